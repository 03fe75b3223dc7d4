use std::time::Duration;

/// Polls the given condition until it holds, panicking after five seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("the expected condition was not met in time");
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
