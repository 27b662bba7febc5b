//! Rule validation.
//!
//! Everything here runs before a sharing is persisted. A validation failure
//! rejects the whole sharing.

use crate::consts::{FILES, FORBIDDEN_DOCTYPES};
use crate::error::ValidationError;
use crate::rule::{Rule, RuleAction};

/// Validate the rules of a new sharing.
pub fn validate_rules(rules: &[Rule]) -> Result<(), ValidationError> {
    if rules.is_empty() {
        return Err(ValidationError::NoRules);
    }
    for (index, rule) in rules.iter().enumerate() {
        validate_rule(index, rule)?;
    }
    Ok(())
}

/// Validate one rule.
///
/// This performs:
/// - Doctype check (present, not an internal doctype)
/// - Values check
/// - Policy check (`revoke` is only meaningful for removals)
/// - File selector check (bare id with one value, or references)
pub fn validate_rule(index: usize, rule: &Rule) -> Result<(), ValidationError> {
    if rule.doctype.is_empty() {
        return Err(ValidationError::MissingDoctype { index });
    }
    if FORBIDDEN_DOCTYPES.contains(&rule.doctype.as_str()) {
        return Err(ValidationError::ForbiddenDoctype {
            index,
            doctype: rule.doctype.clone(),
        });
    }
    if rule.values.is_empty() || rule.values.iter().any(String::is_empty) {
        return Err(ValidationError::MissingValues { index });
    }
    if rule.add == RuleAction::Revoke || rule.update == RuleAction::Revoke {
        return Err(ValidationError::InvalidPolicy {
            index,
            reason: "revoke is only allowed for removals".into(),
        });
    }

    if rule.doctype == FILES {
        if rule.selects_by_id() {
            if rule.values.len() != 1 {
                return Err(ValidationError::TooManyFileValues {
                    index,
                    count: rule.values.len(),
                });
            }
        } else if !rule.selects_by_reference() {
            return Err(ValidationError::InvalidPolicy {
                index,
                reason: format!("files cannot be selected by {}", rule.selector),
            });
        }
    }

    Ok(())
}

/// Validate the description of a new sharing.
pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    if description.trim().is_empty() {
        return Err(ValidationError::MissingDescription);
    }
    Ok(())
}

/// Validate a new sharing before it is persisted: description, rules, and
/// the number of recipients it starts with.
pub fn validate_sharing_request(
    description: &str,
    rules: &[Rule],
    recipients: usize,
) -> Result<(), ValidationError> {
    validate_description(description)?;
    validate_rules(rules)?;
    if recipients == 0 {
        return Err(ValidationError::NoRecipients);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::SHARINGS;

    #[test]
    fn test_valid_rules() {
        let rules = vec![
            Rule::files_by_id("folder", "dir1"),
            Rule::new("notes", "io.cozy.notes")
                .with_selector("foo")
                .with_values(vec!["bar".into(), "baz".into()]),
        ];
        validate_rules(&rules).unwrap();
    }

    #[test]
    fn test_file_rule_with_two_values_fails() {
        let rule = Rule::files_by_id("folder", "dir1").with_values(vec!["dir1".into(), "dir2".into()]);
        assert!(matches!(
            validate_rules(&[rule]),
            Err(ValidationError::TooManyFileValues { index: 0, count: 2 })
        ));
    }

    #[test]
    fn test_file_rule_by_reference_accepts_many() {
        let rule = Rule::new("albums", FILES)
            .with_selector("referenced_by")
            .with_values(vec![
                "io.cozy.photos.albums/a1".into(),
                "io.cozy.photos.albums/a2".into(),
            ]);
        validate_rules(&[rule]).unwrap();
    }

    #[test]
    fn test_file_rule_by_field_fails() {
        let rule = Rule::new("by mime", FILES)
            .with_selector("mime")
            .with_values(vec!["image/png".into()]);
        assert!(matches!(
            validate_rules(&[rule]),
            Err(ValidationError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_empty_rules_fail() {
        assert!(matches!(validate_rules(&[]), Err(ValidationError::NoRules)));
    }

    #[test]
    fn test_forbidden_doctype() {
        let rule = Rule::new("s", SHARINGS).with_values(vec!["x".into()]);
        assert!(matches!(
            validate_rules(&[rule]),
            Err(ValidationError::ForbiddenDoctype { .. })
        ));
    }

    #[test]
    fn test_missing_values() {
        let rule = Rule::new("s", "io.cozy.notes");
        assert!(matches!(
            validate_rules(&[rule]),
            Err(ValidationError::MissingValues { index: 0 })
        ));
    }

    #[test]
    fn test_revoke_on_add_fails() {
        let rule = Rule::new("s", "io.cozy.notes")
            .with_values(vec!["x".into()])
            .with_policies(RuleAction::Revoke, RuleAction::None, RuleAction::None);
        assert!(validate_rules(&[rule]).is_err());
    }

    #[test]
    fn test_description() {
        assert!(validate_description("  ").is_err());
        validate_description("Holidays").unwrap();
    }

    #[test]
    fn test_sharing_request_needs_recipients() {
        let rules = vec![Rule::files_by_id("folder", "dir1")];
        assert!(matches!(
            validate_sharing_request("Holidays", &rules, 0),
            Err(ValidationError::NoRecipients)
        ));
        validate_sharing_request("Holidays", &rules, 2).unwrap();
    }
}
