//! In-memory collection of observations, for tests.
//!
//! ```ignore
//! let collector = ObservationCollector::new();
//! let _guard = tracing::subscriber::set_default(
//!     tracing_subscriber::registry().with(collector.layer()),
//! );
//! // ... perform chat calls ...
//! let observation = collector.last_observation().expect("a chat call was observed");
//! assert!(observation.stopped);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

use super::{
    CONTEXTUAL_NAME_FIELD, ERROR_TYPE_FIELD, HighCardinalityKeyNames, LowCardinalityKeyNames,
    OBSERVATION_NAME,
};

/// A snapshot of one observed chat call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observation {
    pub name: String,
    pub contextual_name: Option<String>,
    pub low_cardinality_key_values: BTreeMap<String, String>,
    pub high_cardinality_key_values: BTreeMap<String, String>,
    pub error: Option<String>,
    pub started: bool,
    pub stopped: bool,
    /// How many times the span is currently entered.
    pub entered: usize,
}

impl Observation {
    pub fn low(&self, key: &str) -> Option<&str> {
        self.low_cardinality_key_values.get(key).map(String::as_str)
    }

    pub fn high(&self, key: &str) -> Option<&str> {
        self.high_cardinality_key_values.get(key).map(String::as_str)
    }
}

type Observations = Arc<Mutex<Vec<Observation>>>;

fn lock(observations: &Observations) -> MutexGuard<'_, Vec<Observation>> {
    observations.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Collects every [`OBSERVATION_NAME`] span seen by its [`ObservationLayer`].
///
/// Cloning is cheap and clones share the collected observations.
#[derive(Debug, Clone, Default)]
pub struct ObservationCollector {
    observations: Observations,
}

impl ObservationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// A layer feeding this collector. Requires a subscriber with span storage, such as
    /// `tracing_subscriber::registry()`.
    pub fn layer(&self) -> ObservationLayer {
        ObservationLayer {
            observations: self.observations.clone(),
        }
    }

    /// Observations in creation order.
    pub fn observations(&self) -> Vec<Observation> {
        lock(&self.observations).clone()
    }

    pub fn last_observation(&self) -> Option<Observation> {
        lock(&self.observations).last().cloned()
    }

    pub fn clear(&self) {
        lock(&self.observations).clear();
    }

    /// Whether any observation is still entered, i.e. still the current span somewhere.
    pub fn has_remaining_current_observation(&self) -> bool {
        lock(&self.observations)
            .iter()
            .any(|observation| observation.entered > 0)
    }
}

/// Index of the span's observation in the collector.
struct ObservationIndex(usize);

pub struct ObservationLayer {
    observations: Observations,
}

impl fmt::Debug for ObservationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationLayer").finish_non_exhaustive()
    }
}

impl ObservationLayer {
    fn update<S, F>(&self, id: &Id, ctx: &Context<'_, S>, update: F)
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
        F: FnOnce(&mut Observation),
    {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let Some(index) = span.extensions().get::<ObservationIndex>().map(|index| index.0) else {
            return;
        };

        if let Some(observation) = lock(&self.observations).get_mut(index) {
            update(observation);
        }
    }
}

impl<S> Layer<S> for ObservationLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        if attrs.metadata().name() != OBSERVATION_NAME {
            return;
        }
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut observation = Observation {
            name: OBSERVATION_NAME.to_string(),
            started: true,
            ..Default::default()
        };
        attrs.record(&mut ObservationVisitor(&mut observation));

        let index = {
            let mut observations = lock(&self.observations);
            observations.push(observation);
            observations.len() - 1
        };
        span.extensions_mut().insert(ObservationIndex(index));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        self.update(id, &ctx, |observation| {
            values.record(&mut ObservationVisitor(observation));
        });
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        self.update(id, &ctx, |observation| observation.entered += 1);
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        self.update(id, &ctx, |observation| {
            observation.entered = observation.entered.saturating_sub(1);
        });
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        self.update(&id, &ctx, |observation| observation.stopped = true);
    }
}

struct ObservationVisitor<'a>(&'a mut Observation);

impl Visit for ObservationVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        let name = field.name();
        let observation = &mut *self.0;

        if name == CONTEXTUAL_NAME_FIELD {
            observation.contextual_name = Some(value.to_string());
        } else if name == ERROR_TYPE_FIELD {
            observation.error = Some(value.to_string());
        } else if LowCardinalityKeyNames::ALL
            .iter()
            .any(|key| key.as_str() == name)
        {
            observation
                .low_cardinality_key_values
                .insert(name.to_string(), value.to_string());
        } else if HighCardinalityKeyNames::ALL
            .iter()
            .any(|key| key.as_str() == name)
        {
            observation
                .high_cardinality_key_values
                .insert(name.to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}
