//! Filter processor configuration

use sluice_config::PluginConfig;

use super::condition::Condition;

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

/// What happens to an event whose conditions match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterAction {
    /// Remove matching events from the batch
    #[default]
    Drop,
    /// Remove every event that does not match
    Keep,
    /// Keep matching events but tag them failed, routing them to the
    /// dead-letter queue when one is configured
    Tag,
}

impl FilterAction {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "drop" => Ok(Self::Drop),
            "keep" => Ok(Self::Keep),
            "tag" => Ok(Self::Tag),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// How conditions combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    #[default]
    All,
    Any,
}

/// Configuration for the filter processor
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub enabled: bool,
    pub action: FilterAction,
    pub match_mode: MatchMode,
    pub conditions: Vec<Condition>,
    /// Failure reason recorded by [`FilterAction::Tag`]
    pub tag_reason: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            action: FilterAction::Drop,
            match_mode: MatchMode::All,
            conditions: Vec::new(),
            tag_reason: "rejected by filter".into(),
        }
    }
}

impl FilterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_action(mut self, action: FilterAction) -> Self {
        self.action = action;
        self
    }

    #[must_use]
    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_tag_reason(mut self, reason: impl Into<String>) -> Self {
        self.tag_reason = reason.into();
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Conditions are compiled on construction; only their presence is left to check
    pub fn validate(&self) -> Result<(), String> {
        if self.conditions.is_empty() {
            return Err("at least one condition is required".to_string());
        }
        Ok(())
    }
}

/// Reads either a single inline condition (`field` / `operator` / `value`)
/// or a `conditions` array of tables, or both.
impl TryFrom<&PluginConfig> for FilterConfig {
    type Error = String;

    fn try_from(plugin: &PluginConfig) -> Result<Self, Self::Error> {
        let mut config = FilterConfig {
            enabled: plugin.enabled,
            ..FilterConfig::default()
        };

        if let Some(action) = plugin.get_str("action") {
            config.action = FilterAction::parse(action)?;
        }
        if let Some(reason) = plugin.get_str("tag_reason") {
            config.tag_reason = reason.to_string();
        }
        config.match_mode = match plugin.get_str("match_mode").or_else(|| plugin.get_str("match")) {
            None | Some("all") => MatchMode::All,
            Some("any") => MatchMode::Any,
            Some(other) => return Err(format!("unknown match mode: {other}")),
        };

        if let Some(field) = plugin.get_str("field") {
            let operator = plugin.get_str("operator").unwrap_or("eq");
            let operand = plugin.options.get("value").and_then(operand);
            config
                .conditions
                .push(Condition::parse(field, operator, operand)?);
        }

        if let Some(tables) = plugin.options.get("conditions").and_then(|v| v.as_array()) {
            for (index, table) in tables.iter().enumerate() {
                let condition =
                    condition_from_table(table).map_err(|e| format!("condition {index}: {e}"))?;
                config.conditions.push(condition);
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn condition_from_table(value: &toml::Value) -> Result<Condition, String> {
    let table = value.as_table().ok_or("must be a table")?;
    let field = table
        .get("field")
        .and_then(|v| v.as_str())
        .ok_or("requires 'field'")?;
    let operator = table
        .get("operator")
        .and_then(|v| v.as_str())
        .unwrap_or("eq");

    Condition::parse(field, operator, table.get("value").and_then(operand))
}

/// TOML scalars compare as their string form (`value = 500` == `value = "500"`)
fn operand(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}
