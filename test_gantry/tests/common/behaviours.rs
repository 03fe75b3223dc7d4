use async_trait::async_trait;
use gantry::{Envelope, HandlerError, ServiceBehaviour};
use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Records the body of every handled message.
#[derive(Default)]
pub struct RecordingBehaviour {
    pub log: Arc<SyncMutex<Vec<String>>>,
}

/// Records a `start:<body>` and an `end:<body>` entry around a short pause,
/// to make handler overlap observable.
pub struct PacedBehaviour {
    pub log: Arc<SyncMutex<Vec<String>>>,
}

/// Blocks every handler on a shared gate until the message bodied `release`
/// arrives, which opens the gate for everyone.
pub struct GatedBehaviour {
    pub log: Arc<SyncMutex<Vec<String>>>,
    pub gate: Arc<Semaphore>,
}

/// Fails every message with the same error text.
pub struct FailingBehaviour {
    pub error: String,
}

impl RecordingBehaviour {
    pub fn new() -> (Arc<Self>, Arc<SyncMutex<Vec<String>>>) {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let behaviour = Arc::new(Self {
            log: Arc::clone(&log),
        });

        (behaviour, log)
    }
}

impl PacedBehaviour {
    pub fn new() -> (Arc<Self>, Arc<SyncMutex<Vec<String>>>) {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let behaviour = Arc::new(Self {
            log: Arc::clone(&log),
        });

        (behaviour, log)
    }
}

impl GatedBehaviour {
    pub fn new() -> (Arc<Self>, Arc<SyncMutex<Vec<String>>>) {
        let log = Arc::new(SyncMutex::new(Vec::new()));
        let behaviour = Arc::new(Self {
            log: Arc::clone(&log),
            gate: Arc::new(Semaphore::new(0)),
        });

        (behaviour, log)
    }
}

#[async_trait]
impl ServiceBehaviour for RecordingBehaviour {
    fn label(&self) -> &str {
        "recording"
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        self.log
            .lock()
            .push(String::from_utf8_lossy(envelope.body()).to_string());

        Ok(())
    }
}

#[async_trait]
impl ServiceBehaviour for PacedBehaviour {
    fn label(&self) -> &str {
        "paced"
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        let body = String::from_utf8_lossy(envelope.body()).to_string();

        self.log.lock().push(format!("start:{}", body));
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.log.lock().push(format!("end:{}", body));

        Ok(())
    }
}

#[async_trait]
impl ServiceBehaviour for GatedBehaviour {
    fn label(&self) -> &str {
        "gated"
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        let body = String::from_utf8_lossy(envelope.body()).to_string();

        self.log.lock().push(format!("start:{}", body));

        if body == "release" {
            // Open the gate wide enough for everyone who will ever wait
            self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        } else {
            let _permit = self
                .gate
                .acquire()
                .await
                .expect("the gate is never closed");
        }

        self.log.lock().push(format!("end:{}", body));

        Ok(())
    }
}

#[async_trait]
impl ServiceBehaviour for FailingBehaviour {
    fn label(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _envelope: Envelope) -> Result<(), HandlerError> {
        Err(self.error.clone().into())
    }
}
