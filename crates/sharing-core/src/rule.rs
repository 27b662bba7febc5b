//! Sharing rules: which documents take part in a sharing, and how their
//! changes propagate.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::consts::{FILES, SELECTOR_REFERENCED_BY};
use crate::doc::Document;
use crate::error::CoreError;

/// Propagation policy of one kind of event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Never propagated.
    #[default]
    None,
    /// Propagated from the owner to the recipients only.
    Push,
    /// Propagated in both directions.
    Sync,
    /// Removing the document revokes the sharing (removal policy only).
    Revoke,
}

impl RuleAction {
    pub fn is_none(&self) -> bool {
        matches!(self, RuleAction::None)
    }

    /// Whether an event with this policy leaves the given side.
    pub fn propagates(&self, owner: bool) -> bool {
        match self {
            RuleAction::Sync => true,
            RuleAction::Push | RuleAction::Revoke => owner,
            RuleAction::None => false,
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A sharing rule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub title: String,
    pub doctype: String,
    /// Empty or `_id` for a bare identifier, `referenced_by`, or a dotted path.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    #[serde(default)]
    pub values: Vec<String>,
    /// Local rules are kept on the owner only and never match.
    #[serde(default, skip_serializing_if = "is_false")]
    pub local: bool,
    #[serde(default, skip_serializing_if = "RuleAction::is_none")]
    pub add: RuleAction,
    #[serde(default, skip_serializing_if = "RuleAction::is_none")]
    pub update: RuleAction,
    #[serde(default, skip_serializing_if = "RuleAction::is_none")]
    pub remove: RuleAction,
}

impl Rule {
    pub fn new(title: impl Into<String>, doctype: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            doctype: doctype.into(),
            ..Default::default()
        }
    }

    /// A rule sharing one directory (or file) and everything below it.
    pub fn files_by_id(title: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(title, FILES)
            .with_values(vec![id.into()])
            .with_policies(RuleAction::Sync, RuleAction::Sync, RuleAction::Sync)
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    pub fn with_values(mut self, values: Vec<String>) -> Self {
        self.values = values;
        self
    }

    pub fn with_policies(mut self, add: RuleAction, update: RuleAction, remove: RuleAction) -> Self {
        self.add = add;
        self.update = update;
        self.remove = remove;
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    pub fn selects_by_id(&self) -> bool {
        self.selector.is_empty() || self.selector == "_id"
    }

    pub fn selects_by_reference(&self) -> bool {
        self.selector == SELECTOR_REFERENCED_BY
    }

    /// A file rule on a single directory/file identifier.
    pub fn is_file_by_id(&self) -> bool {
        self.doctype == FILES && self.selects_by_id()
    }

    /// Whether the rule accepts the document.
    pub fn accept(&self, doctype: &str, doc: &Document) -> bool {
        self.accept_with_ancestors(doctype, doc, &[])
    }

    /// Like [`Rule::accept`], also matching files whose ancestor directory is
    /// selected by id.
    pub fn accept_with_ancestors(&self, doctype: &str, doc: &Document, ancestors: &[String]) -> bool {
        if self.local || doctype != self.doctype {
            return false;
        }
        selector_matches(&self.selector, &self.values, doctype, doc, ancestors)
    }

    /// The trigger filter watching this rule's documents.
    ///
    /// `None` when nothing propagates from this side.
    pub fn trigger_args(&self, owner: bool) -> Option<TriggerArgs> {
        if self.local {
            return None;
        }
        let mut verbs = Vec::new();
        if self.add.propagates(owner) {
            verbs.push(Verb::Created);
        }
        if self.update.propagates(owner) {
            verbs.push(Verb::Updated);
        }
        if self.remove.propagates(owner) {
            verbs.push(Verb::Deleted);
        }
        if verbs.is_empty() {
            return None;
        }
        let selector = if self.selects_by_id() {
            None
        } else {
            Some(self.selector.clone())
        };
        Some(TriggerArgs {
            doctype: self.doctype.clone(),
            verbs,
            values: self.values.clone(),
            selector,
        })
    }
}

fn selector_matches(
    selector: &str,
    values: &[String],
    doctype: &str,
    doc: &Document,
    ancestors: &[String],
) -> bool {
    if selector.is_empty() || selector == "_id" {
        return values
            .iter()
            .any(|v| *v == doc.id || (doctype == FILES && ancestors.contains(v)));
    }
    if selector == SELECTOR_REFERENCED_BY {
        return doc
            .references()
            .iter()
            .any(|r| values.contains(&r.key()));
    }
    match doc.get_path(selector) {
        Some(Value::String(s)) => values.contains(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| values.iter().any(|v| v == s)),
        _ => false,
    }
}

/// Kind of local event a trigger reacts to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Created,
    Updated,
    Deleted,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Created => "CREATED",
            Verb::Updated => "UPDATED",
            Verb::Deleted => "DELETED",
        }
    }
}

impl FromStr for Verb {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(Verb::Created),
            "UPDATED" => Ok(Verb::Updated),
            "DELETED" => Ok(Verb::Deleted),
            other => Err(CoreError::DecodingError(format!("unknown verb: {}", other))),
        }
    }
}

/// Filter of a tracking trigger: `doctype:VERBS[:values[:selector]]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerArgs {
    pub doctype: String,
    pub verbs: Vec<Verb>,
    pub values: Vec<String>,
    pub selector: Option<String>,
}

impl TriggerArgs {
    /// Whether a local event passes this filter.
    ///
    /// For files, `ancestors` are the ids of the directories above the
    /// document, so that a directory value matches its whole subtree.
    pub fn matches(&self, verb: Verb, doc: &Document, ancestors: &[String]) -> bool {
        if doc.doctype != self.doctype || !self.verbs.contains(&verb) {
            return false;
        }
        if self.values.is_empty() {
            return true;
        }
        let selector = self.selector.as_deref().unwrap_or("");
        selector_matches(selector, &self.values, &self.doctype, doc, ancestors)
    }
}

impl fmt::Display for TriggerArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verbs: Vec<&str> = self.verbs.iter().map(Verb::as_str).collect();
        write!(f, "{}:{}", self.doctype, verbs.join(","))?;
        if !self.values.is_empty() || self.selector.is_some() {
            write!(f, ":{}", self.values.join(","))?;
        }
        if let Some(selector) = &self.selector {
            write!(f, ":{}", selector)?;
        }
        Ok(())
    }
}

impl FromStr for TriggerArgs {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(4, ':');
        let doctype = parts
            .next()
            .filter(|d| !d.is_empty())
            .ok_or_else(|| CoreError::DecodingError(format!("invalid trigger args: {}", s)))?;
        let verbs = parts
            .next()
            .ok_or_else(|| CoreError::DecodingError(format!("invalid trigger args: {}", s)))?
            .split(',')
            .map(Verb::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        let values = parts
            .next()
            .filter(|v| !v.is_empty())
            .map(|v| v.split(',').map(String::from).collect())
            .unwrap_or_default();
        let selector = parts.next().filter(|v| !v.is_empty()).map(String::from);
        Ok(Self {
            doctype: doctype.to_string(),
            verbs,
            values,
            selector,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(doctype: &str, value: Value) -> Document {
        Document::from_value(doctype, value).unwrap()
    }

    #[test]
    fn test_accept_dotted_field() {
        let rule = Rule::new("notes", "io.cozy.notes")
            .with_selector("foo")
            .with_values(vec!["bar".into()]);
        assert!(rule.accept("io.cozy.notes", &doc("io.cozy.notes", json!({"_id": "1", "foo": "bar"}))));
        assert!(!rule.accept("io.cozy.notes", &doc("io.cozy.notes", json!({"_id": "1", "foo": "baz"}))));
        assert!(!rule.accept("io.cozy.other", &doc("io.cozy.other", json!({"_id": "1", "foo": "bar"}))));
    }

    #[test]
    fn test_accept_nested_and_array() {
        let rule = Rule::new("tags", "io.cozy.notes")
            .with_selector("meta.tags")
            .with_values(vec!["work".into()]);
        let d = doc("io.cozy.notes", json!({"_id": "1", "meta": {"tags": ["home", "work"]}}));
        assert!(rule.accept("io.cozy.notes", &d));
    }

    #[test]
    fn test_accept_bare_id() {
        let rule = Rule::new("one", "io.cozy.notes").with_values(vec!["n1".into()]);
        assert!(rule.accept("io.cozy.notes", &doc("io.cozy.notes", json!({"_id": "n1"}))));
        assert!(!rule.accept("io.cozy.notes", &doc("io.cozy.notes", json!({"_id": "n2"}))));
    }

    #[test]
    fn test_accept_files_below_shared_dir() {
        let rule = Rule::files_by_id("folder", "dir1");
        let file = doc(FILES, json!({"_id": "f1", "dir_id": "dir2"}));
        assert!(!rule.accept(FILES, &file));
        assert!(rule.accept_with_ancestors(FILES, &file, &["dir2".into(), "dir1".into()]));
    }

    #[test]
    fn test_accept_referenced_by() {
        let rule = Rule::new("album", FILES)
            .with_selector(SELECTOR_REFERENCED_BY)
            .with_values(vec!["io.cozy.photos.albums/a1".into()]);
        let photo = doc(
            FILES,
            json!({"_id": "p1", "referenced_by": [{"type": "io.cozy.photos.albums", "id": "a1"}]}),
        );
        let other = doc(FILES, json!({"_id": "p2"}));
        assert!(rule.accept(FILES, &photo));
        assert!(!rule.accept(FILES, &other));
    }

    #[test]
    fn test_local_rule_never_matches() {
        let rule = Rule::new("one", "io.cozy.notes")
            .with_values(vec!["n1".into()])
            .local();
        assert!(!rule.accept("io.cozy.notes", &doc("io.cozy.notes", json!({"_id": "n1"}))));
    }

    #[test]
    fn test_trigger_args_owner_and_recipient() {
        let rule = Rule::new("notes", "io.cozy.notes")
            .with_selector("foo")
            .with_values(vec!["bar".into()])
            .with_policies(RuleAction::Push, RuleAction::Sync, RuleAction::Revoke);

        let owner = rule.trigger_args(true).unwrap();
        assert_eq!(owner.to_string(), "io.cozy.notes:CREATED,UPDATED,DELETED:bar:foo");

        let recipient = rule.trigger_args(false).unwrap();
        assert_eq!(recipient.to_string(), "io.cozy.notes:UPDATED:bar:foo");

        let silent = Rule::new("x", "io.cozy.notes");
        assert!(silent.trigger_args(true).is_none());
    }

    #[test]
    fn test_trigger_args_parse() {
        let args: TriggerArgs = "io.cozy.files:CREATED,DELETED:dir1".parse().unwrap();
        assert_eq!(args.verbs, vec![Verb::Created, Verb::Deleted]);
        assert_eq!(args.values, vec!["dir1".to_string()]);
        assert_eq!(args.selector, None);
        assert_eq!(args.to_string(), "io.cozy.files:CREATED,DELETED:dir1");

        assert!("io.cozy.files:NOPE".parse::<TriggerArgs>().is_err());
    }

    #[test]
    fn test_trigger_args_matches() {
        let args = Rule::files_by_id("folder", "dir1").trigger_args(true).unwrap();
        let file = doc(FILES, json!({"_id": "f1"}));
        assert!(args.matches(Verb::Updated, &file, &["dir1".into()]));
        assert!(!args.matches(Verb::Updated, &file, &["dir9".into()]));
    }

    #[test]
    fn test_rule_serde_defaults() {
        let rule: Rule = serde_json::from_value(json!({
            "title": "t",
            "doctype": "io.cozy.notes",
            "values": ["a"],
            "add": "sync"
        }))
        .unwrap();
        assert_eq!(rule.add, RuleAction::Sync);
        assert_eq!(rule.update, RuleAction::None);
        assert!(!rule.local);
    }
}
