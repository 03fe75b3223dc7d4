use serde::de::{Error, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt::Formatter;
use std::time::Duration;

/// Tuning knobs for a [`Backoff`](crate::Backoff) pacer.
///
/// This is a plain data carrier: the fields are public and named after the
/// corresponding settings of the underlying [`backoff`] crate. Durations
/// deserialize either from a human-readable string (`"3s"`, `"250ms"`) or
/// from a plain number of seconds, so a config file can say what it means.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// How long to pause after the first failure.
    #[serde(deserialize_with = "deserialize_duration")]
    pub initial_interval: Duration,
    /// The ceiling that the growing pauses never exceed.
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_interval: Duration,
    /// How much random jitter to blend into every pause, as a fraction of
    /// the current interval. Jitter keeps a fleet of nodes from retrying in
    /// lockstep against the same broker.
    pub randomization_factor: f64,
    /// The factor by which a pause grows after each consecutive failure.
    pub multiplier: f64,
    /// The total time after which the schedule reports exhaustion, if any.
    /// The [pacer](crate::Backoff) reacts to exhaustion by pacing at the
    /// [`max_interval`](BackoffConfig::max_interval) ceiling.
    #[serde(deserialize_with = "deserialize_optional_duration")]
    pub max_elapsed_time: Option<Duration>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            randomization_factor: 0.25,
            multiplier: 2.0,
            max_elapsed_time: None,
        }
    }
}

impl AsRef<BackoffConfig> for BackoffConfig {
    fn as_ref(&self) -> &BackoffConfig {
        self
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

fn deserialize_optional_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OptionalDurationVisitor;

    impl<'de> Visitor<'de> for OptionalDurationVisitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
            formatter.write_str("a duration, or none")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(DurationVisitor).map(Some)
        }
    }

    deserializer.deserialize_option(OptionalDurationVisitor)
}

struct DurationVisitor;

impl Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a duration string (like '3s') or a number of seconds")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        humantime::parse_duration(value).map_err(Error::custom)
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Ok(Duration::from_secs(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        u64::try_from(value)
            .map(Duration::from_secs)
            .map_err(|_| Error::custom("expected a non-negative number of seconds"))
    }

    fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Duration::try_from_secs_f64(value).map_err(Error::custom)
    }
}
