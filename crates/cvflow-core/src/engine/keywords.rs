use super::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};

/// A keyword value as it arrives from the (already tokenized) action input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeywordValue {
    Flag(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<KeywordValue>),
}

impl KeywordValue {
    /// Flattens lists and comma separated text into scalar items.
    pub fn items(&self) -> Vec<KeywordValue> {
        match self {
            KeywordValue::List(items) => items.iter().flat_map(KeywordValue::items).collect(),
            KeywordValue::Text(text) if text.contains(',') => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| KeywordValue::Text(s.to_string()))
                .collect(),
            other => vec![other.clone()],
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KeywordValue::Integer(i) => Some(*i as f64),
            KeywordValue::Number(x) => Some(*x),
            KeywordValue::Text(text) => parse_number(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            KeywordValue::Integer(i) => Some(*i),
            KeywordValue::Number(x) if x.fract() == 0.0 => Some(*x as i64),
            KeywordValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            KeywordValue::Flag(b) => Some(*b),
            KeywordValue::Text(text) => match text.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" => Some(true),
                "false" | "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for KeywordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeywordValue::Flag(b) => write!(f, "{b}"),
            KeywordValue::Integer(i) => write!(f, "{i}"),
            KeywordValue::Number(x) => write!(f, "{x}"),
            KeywordValue::Text(s) => f.write_str(s),
            KeywordValue::List(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}

impl From<bool> for KeywordValue {
    fn from(value: bool) -> Self {
        KeywordValue::Flag(value)
    }
}

impl From<i64> for KeywordValue {
    fn from(value: i64) -> Self {
        KeywordValue::Integer(value)
    }
}

impl From<f64> for KeywordValue {
    fn from(value: f64) -> Self {
        KeywordValue::Number(value)
    }
}

impl From<&str> for KeywordValue {
    fn from(value: &str) -> Self {
        KeywordValue::Text(value.to_string())
    }
}

impl From<String> for KeywordValue {
    fn from(value: String) -> Self {
        KeywordValue::Text(value)
    }
}

impl<T: Into<KeywordValue>> From<Vec<T>> for KeywordValue {
    fn from(values: Vec<T>) -> Self {
        KeywordValue::List(values.into_iter().map(Into::into).collect())
    }
}

fn parse_number(text: &str) -> Option<f64> {
    let t = text.trim();
    match t.to_ascii_lowercase().as_str() {
        "pi" => Some(std::f64::consts::PI),
        "-pi" => Some(-std::f64::consts::PI),
        _ => t.parse().ok(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeywordStyle {
    /// Must be present, either in the input or through its default.
    Compulsory,
    Optional,
    /// Boolean switch, false unless given.
    Flag,
    /// Optional list of atom serial numbers.
    Atoms,
    /// Accepts `KEY0`, `KEY1`, ... as well as the bare key.
    Numbered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordSpec {
    pub key: &'static str,
    pub style: KeywordStyle,
    pub default: Option<&'static str>,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    pub name: &'static str,
    pub description: &'static str,
}

/// Keyword schema of a registered action type.
#[derive(Debug, Clone, PartialEq)]
pub struct Keywords {
    pub action: &'static str,
    pub description: &'static str,
    specs: Vec<KeywordSpec>,
    components: Vec<ComponentSpec>,
}

impl Keywords {
    pub fn new(action: &'static str, description: &'static str) -> Self {
        Self {
            action,
            description,
            specs: Vec::new(),
            components: Vec::new(),
        }
    }

    fn push(
        mut self,
        key: &'static str,
        style: KeywordStyle,
        default: Option<&'static str>,
        description: &'static str,
    ) -> Self {
        self.specs.push(KeywordSpec {
            key,
            style,
            default,
            description,
        });
        self
    }

    pub fn compulsory(self, key: &'static str, description: &'static str) -> Self {
        self.push(key, KeywordStyle::Compulsory, None, description)
    }

    pub fn compulsory_with_default(
        self,
        key: &'static str,
        default: &'static str,
        description: &'static str,
    ) -> Self {
        self.push(key, KeywordStyle::Compulsory, Some(default), description)
    }

    pub fn optional(self, key: &'static str, description: &'static str) -> Self {
        self.push(key, KeywordStyle::Optional, None, description)
    }

    pub fn flag(self, key: &'static str, description: &'static str) -> Self {
        self.push(key, KeywordStyle::Flag, None, description)
    }

    pub fn atoms(self, key: &'static str, description: &'static str) -> Self {
        self.push(key, KeywordStyle::Atoms, None, description)
    }

    pub fn numbered(self, key: &'static str, description: &'static str) -> Self {
        self.push(key, KeywordStyle::Numbered, None, description)
    }

    pub fn component(mut self, name: &'static str, description: &'static str) -> Self {
        self.components.push(ComponentSpec { name, description });
        self
    }

    /// Adds the `STRIDE` keyword used by actions that drive their own scheduling.
    pub fn with_stride(self) -> Self {
        self.compulsory_with_default("STRIDE", "1", "the frequency with which the action is performed")
    }

    pub fn specs(&self) -> &[KeywordSpec] {
        &self.specs
    }

    pub fn components(&self) -> &[ComponentSpec] {
        &self.components
    }

    fn spec_for(&self, key: &str) -> Option<&KeywordSpec> {
        if let Some(spec) = self.specs.iter().find(|s| s.key == key) {
            return Some(spec);
        }
        self.specs.iter().find(|s| {
            s.style == KeywordStyle::Numbered
                && key
                    .strip_prefix(s.key)
                    .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
        })
    }

    /// Validates an input keyword map and fills in defaults.
    pub fn parse(
        &self,
        label: &str,
        input: &BTreeMap<String, KeywordValue>,
    ) -> Result<ParsedKeywords, EngineError> {
        let mut values = BTreeMap::new();
        for (key, value) in input {
            let spec = self.spec_for(key).ok_or_else(|| {
                EngineError::configuration(
                    label,
                    format!("keyword {key} is not a valid keyword for {}", self.action),
                )
            })?;
            if spec.style == KeywordStyle::Flag && value.as_flag().is_none() {
                return Err(EngineError::configuration(
                    label,
                    format!("flag {key} expects true or false, found '{value}'"),
                ));
            }
            values.insert(key.clone(), value.clone());
        }

        let mut defaulted = BTreeSet::new();
        for spec in &self.specs {
            if values.contains_key(spec.key) {
                continue;
            }
            match (spec.style, spec.default) {
                (_, Some(default)) => {
                    values.insert(spec.key.to_string(), KeywordValue::Text(default.to_string()));
                    defaulted.insert(spec.key.to_string());
                }
                (KeywordStyle::Compulsory, None) => {
                    return Err(EngineError::configuration(
                        label,
                        format!("compulsory keyword {} is missing", spec.key),
                    ));
                }
                _ => {}
            }
        }

        Ok(ParsedKeywords {
            label: label.to_string(),
            values,
            defaulted,
        })
    }

    /// Human readable documentation of the schema.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}: {}", self.action, self.description);
        for spec in &self.specs {
            let style = match spec.style {
                KeywordStyle::Compulsory => "compulsory",
                KeywordStyle::Optional => "optional",
                KeywordStyle::Flag => "flag",
                KeywordStyle::Atoms => "atoms",
                KeywordStyle::Numbered => "numbered",
            };
            let default = spec
                .default
                .map(|d| format!(" (default={d})"))
                .unwrap_or_default();
            let _ = writeln!(out, "  {:<20} {:<11} {}{}", spec.key, style, spec.description, default);
        }
        if !self.components.is_empty() {
            let _ = writeln!(out, "  components:");
            for component in &self.components {
                let _ = writeln!(out, "    .{:<17} {}", component.name, component.description);
            }
        }
        out
    }
}

/// Keyword values of one action after validation against its schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedKeywords {
    label: String,
    values: BTreeMap<String, KeywordValue>,
    defaulted: BTreeSet<String>,
}

impl ParsedKeywords {
    pub fn label(&self) -> &str {
        &self.label
    }

    fn error(&self, message: String) -> EngineError {
        EngineError::configuration(&self.label, message)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key) && !self.defaulted.contains(key)
    }

    pub fn get(&self, key: &str) -> Option<&KeywordValue> {
        self.values.get(key)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.values
            .get(key)
            .and_then(KeywordValue::as_flag)
            .unwrap_or(false)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.to_string())
    }

    pub fn required_text(&self, key: &str) -> Result<String, EngineError> {
        self.text(key)
            .ok_or_else(|| self.error(format!("keyword {key} is required")))
    }

    pub fn texts(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .map(|v| v.items().iter().map(|i| i.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn f64(&self, key: &str) -> Result<Option<f64>, EngineError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.error(format!("keyword {key} expects a number, found '{value}'"))),
        }
    }

    pub fn usize(&self, key: &str) -> Result<Option<usize>, EngineError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(value) => value
                .as_int()
                .and_then(|i| usize::try_from(i).ok())
                .map(Some)
                .ok_or_else(|| {
                    self.error(format!("keyword {key} expects a non-negative integer, found '{value}'"))
                }),
        }
    }

    pub fn f64_vec(&self, key: &str) -> Result<Option<Vec<f64>>, EngineError> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        value
            .items()
            .iter()
            .map(|item| {
                item.as_f64()
                    .ok_or_else(|| self.error(format!("keyword {key} expects numbers, found '{item}'")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn usize_vec(&self, key: &str) -> Result<Option<Vec<usize>>, EngineError> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        value
            .items()
            .iter()
            .map(|item| {
                item.as_int()
                    .and_then(|i| usize::try_from(i).ok())
                    .ok_or_else(|| {
                        self.error(format!("keyword {key} expects non-negative integers, found '{item}'"))
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// One number per argument. A default is broadcast; an explicit list must have
    /// exactly `count` entries.
    pub fn per_argument(&self, key: &str, count: usize) -> Result<Vec<f64>, EngineError> {
        let values = self
            .f64_vec(key)?
            .ok_or_else(|| self.error(format!("keyword {key} is required")))?;
        if self.defaulted.contains(key) && values.len() == 1 {
            return Ok(vec![values[0]; count]);
        }
        if values.len() != count {
            return Err(self.error(format!(
                "keyword {key} has {} values but there are {count} arguments",
                values.len()
            )));
        }
        Ok(values)
    }

    /// Atom list as 0-based indices. Input uses 1-based serials and `a-b` ranges.
    pub fn atoms(&self, key: &str) -> Result<Option<Vec<usize>>, EngineError> {
        let Some(value) = self.values.get(key) else {
            return Ok(None);
        };
        let mut atoms = Vec::new();
        for item in value.items() {
            let text = item.to_string();
            if let Some((start, end)) = text.split_once('-').filter(|(s, _)| !s.is_empty()) {
                let start = parse_serial(start)
                    .ok_or_else(|| self.error(format!("invalid atom range '{text}' in {key}")))?;
                let end = parse_serial(end)
                    .ok_or_else(|| self.error(format!("invalid atom range '{text}' in {key}")))?;
                if end < start {
                    return Err(self.error(format!("empty atom range '{text}' in {key}")));
                }
                atoms.extend(start..=end);
            } else {
                let serial = parse_serial(&text)
                    .ok_or_else(|| self.error(format!("invalid atom serial '{text}' in {key}")))?;
                atoms.push(serial);
            }
        }
        Ok(Some(atoms))
    }

    /// Keys `KEY<n>` sorted by `n`.
    pub fn numbered_keys(&self, key: &str) -> Vec<(usize, String)> {
        let mut keys: Vec<(usize, String)> = self
            .values
            .keys()
            .filter_map(|k| {
                let rest = k.strip_prefix(key)?;
                if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
                    return None;
                }
                rest.parse().ok().map(|n| (n, k.clone()))
            })
            .collect();
        keys.sort();
        keys
    }

    /// Atom lists given as `KEY0`, `KEY1`, ... in numeric order.
    pub fn numbered_atoms(&self, key: &str) -> Result<Vec<Vec<usize>>, EngineError> {
        self.numbered_keys(key)
            .into_iter()
            .map(|(_, k)| self.atoms(&k).map(Option::unwrap_or_default))
            .collect()
    }
}

fn parse_serial(text: &str) -> Option<usize> {
    let serial: usize = text.trim().parse().ok()?;
    serial.checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Keywords {
        Keywords::new("TEST", "a test action")
            .compulsory("ARG", "the input")
            .compulsory("AT", "positions")
            .compulsory_with_default("EXP", "2", "exponents")
            .optional("LABELS", "names")
            .flag("NOPBC", "ignore periodicity")
            .numbered("ENTITY", "groups")
            .component("bias", "the bias")
    }

    fn input(pairs: &[(&str, KeywordValue)]) -> BTreeMap<String, KeywordValue> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn text(s: &str) -> KeywordValue {
        KeywordValue::Text(s.to_string())
    }

    #[test]
    fn missing_compulsory_keyword_is_a_configuration_error() {
        let err = schema().parse("t", &input(&[("ARG", text("d"))])).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("AT"));
    }

    #[test]
    fn unknown_keyword_is_a_configuration_error() {
        let err = schema()
            .parse("t", &input(&[("ARG", text("d")), ("AT", text("1")), ("KAPA", text("1"))]))
            .unwrap_err();
        assert!(err.to_string().contains("KAPA"));
    }

    #[test]
    fn flag_with_non_boolean_value_is_rejected() {
        let err = schema()
            .parse(
                "t",
                &input(&[("ARG", text("d")), ("AT", text("1")), ("NOPBC", KeywordValue::Integer(3))]),
            )
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn defaults_broadcast_but_explicit_lists_must_match_argument_count() {
        let parsed = schema()
            .parse("t", &input(&[("ARG", text("a,b,c")), ("AT", text("1.0,2.0"))]))
            .unwrap();
        assert_eq!(parsed.per_argument("EXP", 3).unwrap(), vec![2.0, 2.0, 2.0]);
        assert!(parsed.per_argument("AT", 3).is_err());
        assert_eq!(parsed.per_argument("AT", 2).unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn atom_lists_accept_serials_and_ranges() {
        let parsed = schema()
            .parse(
                "t",
                &input(&[
                    ("ARG", text("d")),
                    ("AT", text("1")),
                    ("ENTITY0", text("1-3,7")),
                    ("ENTITY1", KeywordValue::List(vec![KeywordValue::Integer(4), KeywordValue::Integer(5)])),
                ]),
            )
            .unwrap();
        assert_eq!(
            parsed.numbered_atoms("ENTITY").unwrap(),
            vec![vec![0, 1, 2, 6], vec![3, 4]]
        );
    }

    #[test]
    fn atom_serial_zero_is_invalid() {
        let parsed = schema()
            .parse("t", &input(&[("ARG", text("d")), ("AT", text("1")), ("ENTITY0", text("0"))]))
            .unwrap();
        assert!(parsed.atoms("ENTITY0").is_err());
    }

    #[test]
    fn numbers_accept_pi_and_integers() {
        let parsed = schema()
            .parse("t", &input(&[("ARG", text("d")), ("AT", text("-pi,3"))]))
            .unwrap();
        let at = parsed.f64_vec("AT").unwrap().unwrap();
        assert_eq!(at, vec![-std::f64::consts::PI, 3.0]);
        assert!(!parsed.contains("EXP"));
        assert!(parsed.contains("AT"));
    }

    #[test]
    fn describe_lists_keywords_and_components() {
        let doc = schema().describe();
        assert!(doc.starts_with("TEST: a test action"));
        assert!(doc.contains("EXP"));
        assert!(doc.contains("default=2"));
        assert!(doc.contains(".bias"));
    }
}
