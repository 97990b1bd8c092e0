//! Saga step and definition builders.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SagaError;

/// One unit of work in a saga.
///
/// Steps are defined at build time and immutable afterwards. A critical
/// step must carry a compensation; the builder enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStep {
    /// Unique step identifier.
    pub id: Uuid,

    /// Human-readable step name.
    pub name: String,

    /// The target service this step acts on.
    pub service: String,

    /// Registered handler name for the forward action.
    pub action: String,

    /// Registered handler name for the compensating action.
    pub compensation: Option<String>,

    /// Per-attempt timeout for the handler call.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Number of retries after the first failed attempt.
    pub retry_count: u32,

    /// A failure here triggers compensation; non-critical failures are
    /// logged and skipped.
    pub critical: bool,

    /// Parameters handed to the handler.
    pub params: serde_json::Value,
}

impl SagaStep {
    /// Creates a step builder.
    pub fn builder(name: impl Into<String>) -> SagaStepBuilder {
        SagaStepBuilder::new(name)
    }
}

/// Builder for saga steps.
#[derive(Debug)]
pub struct SagaStepBuilder {
    name: String,
    service: String,
    action: Option<String>,
    compensation: Option<String>,
    timeout: Duration,
    retry_count: u32,
    critical: bool,
    params: serde_json::Value,
}

impl SagaStepBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: String::new(),
            action: None,
            compensation: None,
            timeout: Duration::from_secs(30),
            retry_count: 3,
            critical: true,
            params: serde_json::Value::Null,
        }
    }

    /// Sets the target service name.
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    /// Sets the forward handler name.
    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Sets the compensation handler name.
    pub fn compensation(mut self, compensation: impl Into<String>) -> Self {
        self.compensation = Some(compensation.into());
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry count.
    pub fn retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Marks the step critical or not.
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Sets handler parameters.
    pub fn params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Builds the step.
    pub fn build(self) -> Result<SagaStep, SagaError> {
        let action = self.action.ok_or_else(|| {
            SagaError::InvalidDefinition(format!("step {:?} has no action", self.name))
        })?;

        if self.critical && self.compensation.is_none() {
            return Err(SagaError::InvalidDefinition(format!(
                "critical step {:?} requires a compensation",
                self.name
            )));
        }

        Ok(SagaStep {
            id: Uuid::new_v4(),
            name: self.name,
            service: self.service,
            action,
            compensation: self.compensation,
            timeout: self.timeout,
            retry_count: self.retry_count,
            critical: self.critical,
            params: self.params,
        })
    }
}

/// An ordered, immutable list of steps making up one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaDefinition {
    /// The workflow's name.
    pub name: String,

    /// Steps in execution order.
    pub steps: Vec<SagaStep>,

    /// Overall budget for forward execution; a saga exceeding it is
    /// treated as a critical failure and compensated. None = unbounded.
    #[serde(default, with = "opt_duration_millis")]
    pub timeout: Option<Duration>,
}

impl SagaDefinition {
    /// Creates a definition builder.
    pub fn builder(name: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
            timeout: None,
        }
    }

    /// The step with the given ID, if any.
    pub fn step(&self, id: Uuid) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the definition has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Builder for saga definitions.
#[derive(Debug)]
pub struct SagaDefinitionBuilder {
    name: String,
    steps: Vec<SagaStep>,
    timeout: Option<Duration>,
}

impl SagaDefinitionBuilder {
    /// Appends a step.
    pub fn step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Bounds the saga's total forward-execution time.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the definition.
    pub fn build(self) -> Result<SagaDefinition, SagaError> {
        if self.steps.is_empty() {
            return Err(SagaError::InvalidDefinition(format!(
                "saga {:?} has no steps",
                self.name
            )));
        }

        Ok(SagaDefinition {
            name: self.name,
            steps: self.steps,
            timeout: self.timeout,
        })
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
