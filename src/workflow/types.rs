/// Workflow definition types
///
/// Operators author workflows as JSON (`RawWorkflowDefinition`): a trigger type
/// with a loose condition map and a list of steps with a loose configuration map.
/// `WorkflowDefinition::from_raw` turns that into closed, typed variants and
/// rejects anything malformed before it can be persisted.

use crate::{error::DefinitionError, targets::TargetRef};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{collections::HashSet, fmt};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// Kinds of business events that can start a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A target's status field changed
    StatusChanged,
    /// A target has been sitting in one status for a number of days
    TimeInStatus,
    /// A target was created
    RecordCreated,
    /// A document was attached to a target
    DocumentUploaded,
    /// Fired explicitly by an operator or another subsystem
    Manual,
}

impl TriggerType {
    pub const ALL: [TriggerType; 5] = [
        TriggerType::StatusChanged,
        TriggerType::TimeInStatus,
        TriggerType::RecordCreated,
        TriggerType::DocumentUploaded,
        TriggerType::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::StatusChanged => "status_changed",
            TriggerType::TimeInStatus => "time_in_status",
            TriggerType::RecordCreated => "record_created",
            TriggerType::DocumentUploaded => "document_uploaded",
            TriggerType::Manual => "manual",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed trigger specification with its gating conditions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerSpec {
    StatusChanged {
        from_status: Option<String>,
        to_status: String,
    },
    TimeInStatus {
        status: String,
        days: u32,
    },
    RecordCreated {
        target_type: Option<String>,
    },
    DocumentUploaded {
        document_type: Option<String>,
    },
    Manual,
}

impl TriggerSpec {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerSpec::StatusChanged { .. } => TriggerType::StatusChanged,
            TriggerSpec::TimeInStatus { .. } => TriggerType::TimeInStatus,
            TriggerSpec::RecordCreated { .. } => TriggerType::RecordCreated,
            TriggerSpec::DocumentUploaded { .. } => TriggerType::DocumentUploaded,
            TriggerSpec::Manual => TriggerType::Manual,
        }
    }

    /// Validate a loose condition map against the trigger type
    pub fn from_conditions(trigger_type: &str, conditions: &Map<String, Value>) -> Result<Self, DefinitionError> {
        let kind = TriggerType::parse(trigger_type)
            .ok_or_else(|| DefinitionError::UnknownTriggerType(trigger_type.to_string()))?;
        let reader = ConditionReader { kind, conditions };

        let spec = match kind {
            TriggerType::StatusChanged => {
                reader.only(&["from_status", "to_status"])?;
                TriggerSpec::StatusChanged {
                    from_status: reader.opt_string("from_status")?,
                    to_status: reader.string("to_status")?,
                }
            }
            TriggerType::TimeInStatus => {
                reader.only(&["status", "days"])?;
                TriggerSpec::TimeInStatus {
                    status: reader.string("status")?,
                    days: reader.positive_int("days")?,
                }
            }
            TriggerType::RecordCreated => {
                reader.only(&["target_type"])?;
                TriggerSpec::RecordCreated {
                    target_type: reader.opt_string("target_type")?,
                }
            }
            TriggerType::DocumentUploaded => {
                reader.only(&["document_type"])?;
                TriggerSpec::DocumentUploaded {
                    document_type: reader.opt_string("document_type")?,
                }
            }
            TriggerType::Manual => {
                reader.only(&[])?;
                TriggerSpec::Manual
            }
        };

        Ok(spec)
    }

    /// Condition map for storage (inverse of `from_conditions`)
    pub fn conditions(&self) -> Map<String, Value> {
        let value = match self {
            TriggerSpec::StatusChanged { from_status, to_status } => {
                let mut map = json!({ "to_status": to_status });
                if let Some(from) = from_status {
                    map["from_status"] = json!(from);
                }
                map
            }
            TriggerSpec::TimeInStatus { status, days } => json!({ "status": status, "days": days }),
            TriggerSpec::RecordCreated { target_type: Some(t) } => json!({ "target_type": t }),
            TriggerSpec::DocumentUploaded { document_type: Some(d) } => json!({ "document_type": d }),
            _ => json!({}),
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    /// Whether an incoming event satisfies this trigger's gating
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        if event.trigger_type != self.trigger_type() {
            return false;
        }

        let attr = |name: &str| event.attributes.get(name).and_then(Value::as_str);

        match self {
            TriggerSpec::StatusChanged { from_status, to_status } => {
                attr("to_status") == Some(to_status.as_str())
                    && from_status
                        .as_deref()
                        .map_or(true, |from| attr("from_status") == Some(from))
            }
            TriggerSpec::TimeInStatus { status, days } => {
                let elapsed = event.attributes.get("days_in_status").and_then(Value::as_u64);
                attr("status") == Some(status.as_str()) && elapsed.map_or(false, |d| d >= u64::from(*days))
            }
            TriggerSpec::RecordCreated { target_type } => target_type
                .as_deref()
                .map_or(true, |t| event.target.target_type == t),
            TriggerSpec::DocumentUploaded { document_type } => document_type
                .as_deref()
                .map_or(true, |d| attr("document_type") == Some(d)),
            TriggerSpec::Manual => true,
        }
    }

    /// Trigger key used when the producer does not supply one
    pub fn default_trigger_key(&self) -> String {
        match self {
            TriggerSpec::StatusChanged { to_status, .. } => format!("status_changed_to_{to_status}"),
            TriggerSpec::TimeInStatus { status, days } => {
                format!("stuck_in_status_{status}_for_{days}_days")
            }
            TriggerSpec::RecordCreated { .. } => "record_created".to_string(),
            TriggerSpec::DocumentUploaded { document_type } => format!(
                "document_uploaded_{}",
                document_type.as_deref().unwrap_or("any")
            ),
            TriggerSpec::Manual => format!("manual_{}", Uuid::new_v4()),
        }
    }
}

struct ConditionReader<'a> {
    kind: TriggerType,
    conditions: &'a Map<String, Value>,
}

impl ConditionReader<'_> {
    fn invalid(&self, reason: String) -> DefinitionError {
        DefinitionError::InvalidTriggerConditions {
            trigger_type: self.kind.to_string(),
            reason,
        }
    }

    fn only(&self, allowed: &[&str]) -> Result<(), DefinitionError> {
        match self.conditions.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(unknown) => Err(self.invalid(format!("unexpected key '{unknown}'"))),
            None => Ok(()),
        }
    }

    fn string(&self, key: &str) -> Result<String, DefinitionError> {
        self.opt_string(key)?
            .ok_or_else(|| self.invalid(format!("missing '{key}'")))
    }

    fn opt_string(&self, key: &str) -> Result<Option<String>, DefinitionError> {
        match self.conditions.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(format!("'{key}' must be a non-empty string"))),
        }
    }

    fn positive_int(&self, key: &str) -> Result<u32, DefinitionError> {
        let value = self
            .conditions
            .get(key)
            .ok_or_else(|| self.invalid(format!("missing '{key}'")))?;
        value
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| self.invalid(format!("'{key}' must be a positive integer")))
    }
}

/// An observed business event offered to the engine by a trigger producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: TriggerType,
    pub target: TargetRef,
    /// Event facts used for matching (e.g. "to_status", "days_in_status")
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// Identifies the logical occurrence; defaults to the workflow trigger's key
    #[serde(default)]
    pub trigger_key: Option<String>,
    #[serde(default)]
    pub run_once: bool,
    /// Snapshot handed to the execution for template substitution
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType, target: TargetRef) -> Self {
        Self {
            trigger_type,
            target,
            attributes: Map::new(),
            trigger_key: None,
            run_once: false,
            context: Map::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    pub fn with_context(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn with_trigger_key(mut self, key: impl Into<String>) -> Self {
        self.trigger_key = Some(key.into());
        self
    }

    pub fn run_once(mut self, run_once: bool) -> Self {
        self.run_once = run_once;
        self
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Available step types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    SendEmail,
    Delay,
    Condition,
    UpdateStatus,
    /// Declared, not executable
    Webhook,
    /// Declared, not executable
    WaitForEvent,
}

impl StepType {
    pub const ALL: [StepType; 6] = [
        StepType::SendEmail,
        StepType::Delay,
        StepType::Condition,
        StepType::UpdateStatus,
        StepType::Webhook,
        StepType::WaitForEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::SendEmail => "send_email",
            StepType::Delay => "delay",
            StepType::Condition => "condition",
            StepType::UpdateStatus => "update_status",
            StepType::Webhook => "webhook",
            StepType::WaitForEvent => "wait_for_event",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of a delay step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelayUnit::Minutes => "minutes",
            DelayUnit::Hours => "hours",
            DelayUnit::Days => "days",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "minutes" => Some(DelayUnit::Minutes),
            "hours" => Some(DelayUnit::Hours),
            "days" => Some(DelayUnit::Days),
            _ => None,
        }
    }
}

/// Send a templated message to a (possibly templated) recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendEmailConfig {
    /// Message template key
    pub template: String,
    /// Destination address; may contain `{{ placeholders }}`
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayConfig {
    pub amount: u32,
    pub unit: DelayUnit,
}

impl DelayConfig {
    /// Longest wait a delay step may ask for
    pub const MAX_DAYS: i64 = 3650;

    pub fn within_limit(&self) -> bool {
        self.duration() <= Duration::days(Self::MAX_DAYS)
    }

    pub fn duration(&self) -> Duration {
        let amount = i64::from(self.amount);
        match self.unit {
            DelayUnit::Minutes => Duration::minutes(amount),
            DelayUnit::Hours => Duration::hours(amount),
            DelayUnit::Days => Duration::days(amount),
        }
    }
}

/// Named condition evaluated against one live target field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    FieldEquals { field: String, value: Value },
    FieldNotEquals { field: String, value: Value },
    FieldPresent { field: String },
    FieldAbsent { field: String },
    FieldIn { field: String, values: Vec<Value> },
}

impl Condition {
    pub fn condition_type(&self) -> &'static str {
        match self {
            Condition::FieldEquals { .. } => "field_equals",
            Condition::FieldNotEquals { .. } => "field_not_equals",
            Condition::FieldPresent { .. } => "field_present",
            Condition::FieldAbsent { .. } => "field_absent",
            Condition::FieldIn { .. } => "field_in",
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Condition::FieldEquals { field, .. }
            | Condition::FieldNotEquals { field, .. }
            | Condition::FieldPresent { field }
            | Condition::FieldAbsent { field }
            | Condition::FieldIn { field, .. } => field,
        }
    }

    /// Evaluate against the field's current value (None = null/missing)
    pub fn evaluate(&self, current: Option<&Value>) -> bool {
        let current = current.filter(|v| !v.is_null());
        match self {
            Condition::FieldEquals { value, .. } => current == Some(value),
            Condition::FieldNotEquals { value, .. } => current != Some(value),
            Condition::FieldPresent { .. } => current.map_or(false, |v| v.as_str() != Some("")),
            Condition::FieldAbsent { .. } => current.map_or(true, |v| v.as_str() == Some("")),
            Condition::FieldIn { values, .. } => current.map_or(false, |v| values.contains(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatusConfig {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub url: String,
    pub method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitForEventConfig {
    pub event: String,
}

/// Closed set of step configurations, one per step type
#[derive(Debug, Clone, PartialEq)]
pub enum StepConfig {
    SendEmail(SendEmailConfig),
    Delay(DelayConfig),
    Condition(Condition),
    UpdateStatus(UpdateStatusConfig),
    Webhook(WebhookConfig),
    WaitForEvent(WaitForEventConfig),
}

impl StepConfig {
    pub fn step_type(&self) -> StepType {
        match self {
            StepConfig::SendEmail(_) => StepType::SendEmail,
            StepConfig::Delay(_) => StepType::Delay,
            StepConfig::Condition(_) => StepType::Condition,
            StepConfig::UpdateStatus(_) => StepType::UpdateStatus,
            StepConfig::Webhook(_) => StepType::Webhook,
            StepConfig::WaitForEvent(_) => StepType::WaitForEvent,
        }
    }

    pub fn send_email(template: &str, to: &str) -> Self {
        StepConfig::SendEmail(SendEmailConfig {
            template: template.to_string(),
            to: to.to_string(),
        })
    }

    pub fn delay(amount: u32, unit: DelayUnit) -> Self {
        StepConfig::Delay(DelayConfig { amount, unit })
    }

    pub fn update_status(field: &str, value: impl Into<Value>) -> Self {
        StepConfig::UpdateStatus(UpdateStatusConfig {
            field: field.to_string(),
            value: value.into(),
        })
    }

    /// Parse and validate a loose configuration map for `step_type`
    ///
    /// Fails with `DefinitionError::Configuration` naming the first missing key.
    pub fn from_configuration(
        step_type: &str,
        position: i64,
        configuration: &Map<String, Value>,
    ) -> Result<Self, DefinitionError> {
        let kind = StepType::parse(step_type).ok_or_else(|| DefinitionError::UnknownStepType {
            position,
            step_type: step_type.to_string(),
        })?;
        let reader = ConfigReader {
            kind,
            position,
            configuration,
        };

        let config = match kind {
            StepType::SendEmail => StepConfig::SendEmail(SendEmailConfig {
                template: reader.string("template")?,
                to: reader.string("to")?,
            }),
            StepType::Delay => {
                let amount = reader.positive_int("duration")?;
                let raw_unit = reader.string("unit")?;
                let unit = DelayUnit::parse(&raw_unit)
                    .ok_or_else(|| reader.invalid("unit", "expected minutes, hours or days"))?;
                let delay = DelayConfig { amount, unit };
                if !delay.within_limit() {
                    return Err(reader.invalid("duration", &delay_limit_reason()));
                }
                StepConfig::Delay(delay)
            }
            StepType::Condition => {
                let condition_type = reader.string("condition_type")?;
                let field = reader.string("field")?;
                let condition = match condition_type.as_str() {
                    "field_equals" => Condition::FieldEquals {
                        field,
                        value: reader.value("value")?,
                    },
                    "field_not_equals" => Condition::FieldNotEquals {
                        field,
                        value: reader.value("value")?,
                    },
                    "field_present" => Condition::FieldPresent { field },
                    "field_absent" => Condition::FieldAbsent { field },
                    "field_in" => Condition::FieldIn {
                        field,
                        values: reader.array("values")?,
                    },
                    other => {
                        return Err(reader.invalid(
                            "condition_type",
                            &format!("unknown condition type '{other}'"),
                        ))
                    }
                };
                StepConfig::Condition(condition)
            }
            StepType::UpdateStatus => StepConfig::UpdateStatus(UpdateStatusConfig {
                field: reader.string("field")?,
                value: reader.value("value")?,
            }),
            StepType::Webhook => StepConfig::Webhook(WebhookConfig {
                url: reader.string("url")?,
                method: reader.opt_string("method")?,
            }),
            StepType::WaitForEvent => StepConfig::WaitForEvent(WaitForEventConfig {
                event: reader.string("event")?,
            }),
        };

        Ok(config)
    }

    /// Configuration map for storage (inverse of `from_configuration`)
    pub fn configuration(&self) -> Map<String, Value> {
        let value = match self {
            StepConfig::SendEmail(c) => json!({ "template": c.template, "to": c.to }),
            StepConfig::Delay(c) => json!({ "duration": c.amount, "unit": c.unit.as_str() }),
            StepConfig::Condition(c) => {
                let mut map = json!({ "condition_type": c.condition_type(), "field": c.field() });
                match c {
                    Condition::FieldEquals { value, .. } | Condition::FieldNotEquals { value, .. } => {
                        map["value"] = value.clone();
                    }
                    Condition::FieldIn { values, .. } => map["values"] = json!(values),
                    _ => {}
                }
                map
            }
            StepConfig::UpdateStatus(c) => json!({ "field": c.field, "value": c.value }),
            StepConfig::Webhook(c) => match &c.method {
                Some(method) => json!({ "url": c.url, "method": method }),
                None => json!({ "url": c.url }),
            },
            StepConfig::WaitForEvent(c) => json!({ "event": c.event }),
        };

        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

fn delay_limit_reason() -> String {
    format!("must not exceed {} days", DelayConfig::MAX_DAYS)
}

struct ConfigReader<'a> {
    kind: StepType,
    position: i64,
    configuration: &'a Map<String, Value>,
}

impl ConfigReader<'_> {
    fn missing(&self, field: &str) -> DefinitionError {
        DefinitionError::Configuration {
            position: self.position,
            step_type: self.kind.to_string(),
            field: field.to_string(),
        }
    }

    fn invalid(&self, field: &str, reason: &str) -> DefinitionError {
        DefinitionError::InvalidConfiguration {
            position: self.position,
            step_type: self.kind.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        }
    }

    fn value(&self, field: &str) -> Result<Value, DefinitionError> {
        self.configuration
            .get(field)
            .cloned()
            .ok_or_else(|| self.missing(field))
    }

    fn string(&self, field: &str) -> Result<String, DefinitionError> {
        self.opt_string(field)?.ok_or_else(|| self.missing(field))
    }

    fn opt_string(&self, field: &str) -> Result<Option<String>, DefinitionError> {
        match self.configuration.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.clone())),
            Some(_) => Err(self.invalid(field, "expected a non-empty string")),
        }
    }

    fn positive_int(&self, field: &str) -> Result<u32, DefinitionError> {
        self.value(field)?
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| self.invalid(field, "expected a positive integer"))
    }

    fn array(&self, field: &str) -> Result<Vec<Value>, DefinitionError> {
        match self.value(field)? {
            Value::Array(items) if !items.is_empty() => Ok(items),
            _ => Err(self.invalid(field, "expected a non-empty array")),
        }
    }
}

/// One configured step within a workflow
#[derive(Debug, Clone, PartialEq)]
pub struct StepDefinition {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// Ordering key, unique within the workflow
    pub position: i64,
    pub config: StepConfig,
}

impl StepDefinition {
    pub fn step_type(&self) -> StepType {
        self.config.step_type()
    }
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// Validated workflow recipe
///
/// Steps are kept sorted by position. An execution's cursor is an index into
/// this ordered list, so positions only need to be unique, not contiguous.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub trigger: TriggerSpec,
    pub active: bool,
    steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Build an active workflow from step configs, positioned 0..n in order
    pub fn new(name: &str, trigger: TriggerSpec, steps: Vec<StepConfig>) -> Result<Self, DefinitionError> {
        let id = Uuid::new_v4();
        let steps = steps
            .into_iter()
            .enumerate()
            .map(|(position, config)| StepDefinition {
                id: Uuid::new_v4(),
                workflow_id: id,
                position: position as i64,
                config,
            })
            .collect();

        Self::from_parts(id, name.to_string(), trigger, true, steps)
    }

    /// Assemble and validate a workflow from already-typed parts
    pub fn from_parts(
        id: Uuid,
        name: String,
        trigger: TriggerSpec,
        active: bool,
        mut steps: Vec<StepDefinition>,
    ) -> Result<Self, DefinitionError> {
        if name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if steps.is_empty() {
            return Err(DefinitionError::NoSteps);
        }

        let mut seen = HashSet::new();
        for step in &steps {
            if step.position < 0 {
                return Err(DefinitionError::Ordering {
                    position: step.position,
                    reason: "must not be negative".to_string(),
                });
            }
            if !seen.insert(step.position) {
                return Err(DefinitionError::Ordering {
                    position: step.position,
                    reason: "is used by more than one step".to_string(),
                });
            }
            if let StepConfig::Delay(delay) = &step.config {
                if !delay.within_limit() {
                    return Err(DefinitionError::InvalidConfiguration {
                        position: step.position,
                        step_type: StepType::Delay.to_string(),
                        field: "duration".to_string(),
                        reason: delay_limit_reason(),
                    });
                }
            }
        }

        steps.sort_by_key(|s| s.position);
        for step in &mut steps {
            step.workflow_id = id;
        }

        Ok(Self {
            id,
            name,
            trigger,
            active,
            steps,
        })
    }

    /// Validate an operator-authored definition
    pub fn from_raw(raw: RawWorkflowDefinition) -> Result<Self, DefinitionError> {
        let id = raw.id.unwrap_or_else(Uuid::new_v4);
        let trigger = TriggerSpec::from_conditions(&raw.trigger_type, &raw.trigger_conditions)?;

        let steps = raw
            .steps
            .iter()
            .map(|step| {
                Ok(StepDefinition {
                    id: step.id.unwrap_or_else(Uuid::new_v4),
                    workflow_id: id,
                    position: step.position,
                    config: StepConfig::from_configuration(&step.step_type, step.position, &step.configuration)?,
                })
            })
            .collect::<Result<Vec<_>, DefinitionError>>()?;

        Self::from_parts(id, raw.name, trigger, raw.active, steps)
    }

    /// Export back to the authoring form
    pub fn to_raw(&self) -> RawWorkflowDefinition {
        RawWorkflowDefinition {
            id: Some(self.id),
            name: self.name.clone(),
            trigger_type: self.trigger.trigger_type().to_string(),
            trigger_conditions: self.trigger.conditions(),
            active: self.active,
            steps: self
                .steps
                .iter()
                .map(|s| RawStepDefinition {
                    id: Some(s.id),
                    step_type: s.step_type().to_string(),
                    position: s.position,
                    configuration: s.config.configuration(),
                })
                .collect(),
        }
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Step at a cursor index
    pub fn step_at(&self, cursor: i64) -> Option<&StepDefinition> {
        usize::try_from(cursor).ok().and_then(|i| self.steps.get(i))
    }

    /// Cursor index of a step id
    pub fn cursor_of(&self, step_id: Uuid) -> Option<i64> {
        self.steps.iter().position(|s| s.id == step_id).map(|i| i as i64)
    }
}

/// Operator-authored workflow definition (JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWorkflowDefinition {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub name: String,
    pub trigger_type: String,
    #[serde(default)]
    pub trigger_conditions: Map<String, Value>,
    #[serde(default = "default_active")]
    pub active: bool,
    pub steps: Vec<RawStepDefinition>,
}

/// Operator-authored step definition (JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawStepDefinition {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub step_type: String,
    pub position: i64,
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

fn default_active() -> bool {
    true
}
