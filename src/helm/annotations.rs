//! Package enrichment from chart annotations.
//!
//! Charts can carry extra catalog metadata in `Chart.yaml` annotations under
//! the `artifacthub.io/` prefix. Most values are YAML documents embedded in a
//! string. A key that is absent (or blank) leaves the targeted field as it
//! was, and a value that fails to parse never touches its field.

use crate::model::{ContainerImage, Link, Maintainer, Package};
use crate::structured::StructuredValue;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use thiserror::Error;

pub const CHANGES_ANNOTATION: &str = "artifacthub.io/changes";
pub const CRDS_ANNOTATION: &str = "artifacthub.io/crds";
pub const CRDS_EXAMPLES_ANNOTATION: &str = "artifacthub.io/crdsExamples";
pub const IMAGES_ANNOTATION: &str = "artifacthub.io/images";
pub const LICENSE_ANNOTATION: &str = "artifacthub.io/license";
pub const LINKS_ANNOTATION: &str = "artifacthub.io/links";
pub const MAINTAINERS_ANNOTATION: &str = "artifacthub.io/maintainers";
pub const OPERATOR_ANNOTATION: &str = "artifacthub.io/operator";
pub const OPERATOR_CAPABILITIES_ANNOTATION: &str = "artifacthub.io/operatorCapabilities";
pub const PRERELEASE_ANNOTATION: &str = "artifacthub.io/prerelease";
pub const SECURITY_UPDATES_ANNOTATION: &str = "artifacthub.io/containsSecurityUpdates";

/// An annotation value that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {field} value: {reason}")]
pub struct AnnotationError {
    pub field: &'static str,
    pub reason: String,
}

impl AnnotationError {
    fn new(field: &'static str, reason: impl ToString) -> Self {
        Self {
            field,
            reason: reason.to_string(),
        }
    }
}

/// Merges the recognized `annotations` into `pkg`.
///
/// Every recognized key is processed even when an earlier one fails; the
/// error of the last failing key is returned.
pub fn enrich_package(
    pkg: &mut Package,
    annotations: &HashMap<String, String>,
) -> Result<(), AnnotationError> {
    let results = [
        apply_yaml::<Vec<String>>(annotations, CHANGES_ANNOTATION, "changes", &mut pkg.changes),
        apply_maps(annotations, CRDS_ANNOTATION, "crds", &mut pkg.crds),
        apply_maps(
            annotations,
            CRDS_EXAMPLES_ANNOTATION,
            "crds examples",
            &mut pkg.crds_examples,
        ),
        apply_yaml::<Vec<ContainerImage>>(
            annotations,
            IMAGES_ANNOTATION,
            "images",
            &mut pkg.containers_images,
        ),
        apply_license(annotations, &mut pkg.license),
        apply_yaml::<Vec<Link>>(annotations, LINKS_ANNOTATION, "links", &mut pkg.links),
        apply_yaml::<Vec<Maintainer>>(
            annotations,
            MAINTAINERS_ANNOTATION,
            "maintainers",
            &mut pkg.maintainers,
        ),
        apply_bool(annotations, OPERATOR_ANNOTATION, "operator", &mut pkg.is_operator),
        apply_capabilities(annotations, &mut pkg.capabilities),
        apply_bool(
            annotations,
            PRERELEASE_ANNOTATION,
            "prerelease",
            &mut pkg.prerelease,
        ),
        apply_bool(
            annotations,
            SECURITY_UPDATES_ANNOTATION,
            "security updates",
            &mut pkg.contains_security_updates,
        ),
    ];

    match results.into_iter().filter_map(Result::err).last() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Value of `key`, unless missing or blank.
fn lookup<'a>(annotations: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    annotations
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

fn parse_yaml<T: DeserializeOwned>(raw: &str, field: &'static str) -> Result<T, AnnotationError> {
    serde_yaml::from_str(raw).map_err(|e| AnnotationError::new(field, e))
}

fn apply_yaml<T: DeserializeOwned>(
    annotations: &HashMap<String, String>,
    key: &str,
    field: &'static str,
    target: &mut T,
) -> Result<(), AnnotationError> {
    if let Some(raw) = lookup(annotations, key) {
        *target = parse_yaml(raw, field)?;
    }
    Ok(())
}

/// Like [`apply_yaml`] for free-form lists whose items must all be mappings.
fn apply_maps(
    annotations: &HashMap<String, String>,
    key: &str,
    field: &'static str,
    target: &mut Vec<StructuredValue>,
) -> Result<(), AnnotationError> {
    let Some(raw) = lookup(annotations, key) else {
        return Ok(());
    };
    let items: Vec<StructuredValue> = parse_yaml(raw, field)?;
    if !items.iter().all(|item| matches!(item, StructuredValue::Map(_))) {
        return Err(AnnotationError::new(field, "expected a list of mappings"));
    }
    *target = items;
    Ok(())
}

fn apply_bool(
    annotations: &HashMap<String, String>,
    key: &str,
    field: &'static str,
    target: &mut bool,
) -> Result<(), AnnotationError> {
    if let Some(raw) = lookup(annotations, key) {
        *target = parse_bool(raw.trim())
            .ok_or_else(|| AnnotationError::new(field, format!("{raw:?} is not a boolean")))?;
    }
    Ok(())
}

/// Boolean literals accepted by chart tooling.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

fn apply_license(
    annotations: &HashMap<String, String>,
    target: &mut String,
) -> Result<(), AnnotationError> {
    if let Some(license) = lookup(annotations, LICENSE_ANNOTATION) {
        *target = license.trim().to_string();
    }
    Ok(())
}

fn apply_capabilities(
    annotations: &HashMap<String, String>,
    target: &mut String,
) -> Result<(), AnnotationError> {
    if let Some(capabilities) = annotations.get(OPERATOR_CAPABILITIES_ANNOTATION) {
        *target = capabilities.clone();
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn annotations(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn link(name: &str, url: &str) -> Link {
        Link {
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    fn maintainer(name: &str, email: &str) -> Maintainer {
        Maintainer {
            name: name.to_string(),
            email: email.to_string(),
        }
    }

    #[rstest]
    #[case::changes(
        Package::default(),
        &[(CHANGES_ANNOTATION, "\n- Added cool feature\n- Fixed minor bug\n")],
        Package {
            changes: vec!["Added cool feature".to_string(), "Fixed minor bug".to_string()],
            ..Default::default()
        },
        None
    )]
    #[case::images(
        Package::default(),
        &[(IMAGES_ANNOTATION, "\n- name: img1\n  image: repo/img1:1.0.0\n- name: img2\n  image: repo/img2:2.0.0\n  whitelisted: true\n")],
        Package {
            containers_images: vec![
                ContainerImage { name: "img1".to_string(), image: "repo/img1:1.0.0".to_string(), whitelisted: false },
                ContainerImage { name: "img2".to_string(), image: "repo/img2:2.0.0".to_string(), whitelisted: true },
            ],
            ..Default::default()
        },
        None
    )]
    #[case::license_set(
        Package::default(),
        &[(LICENSE_ANNOTATION, "Apache-2.0")],
        Package { license: "Apache-2.0".to_string(), ..Default::default() },
        None
    )]
    #[case::license_overrides(
        Package { license: "GPL-3".to_string(), ..Default::default() },
        &[(LICENSE_ANNOTATION, "Apache-2.0")],
        Package { license: "Apache-2.0".to_string(), ..Default::default() },
        None
    )]
    #[case::license_empty_is_noop(
        Package { license: "Apache-2.0".to_string(), ..Default::default() },
        &[(LICENSE_ANNOTATION, "")],
        Package { license: "Apache-2.0".to_string(), ..Default::default() },
        None
    )]
    #[case::links_invalid(
        Package::default(),
        &[(LINKS_ANNOTATION, r#""{\""#)],
        Package::default(),
        Some("invalid links value")
    )]
    #[case::links_invalid_keeps_previous(
        Package { links: vec![link("", "https://link1.url")], ..Default::default() },
        &[(LINKS_ANNOTATION, r#""{\""#)],
        Package { links: vec![link("", "https://link1.url")], ..Default::default() },
        Some("invalid links value")
    )]
    #[case::links_not_a_list(
        Package { links: vec![link("", "https://link1.url")], ..Default::default() },
        &[(LINKS_ANNOTATION, "https://link2.url")],
        Package { links: vec![link("", "https://link1.url")], ..Default::default() },
        Some("invalid links value")
    )]
    #[case::links_set(
        Package::default(),
        &[(LINKS_ANNOTATION, "\n- name: link1\n  url: https://link1.url\n")],
        Package { links: vec![link("link1", "https://link1.url")], ..Default::default() },
        None
    )]
    #[case::links_replaced(
        Package { links: vec![link("", "https://link1.url")], ..Default::default() },
        &[(LINKS_ANNOTATION, "\n- name: link1\n  url: https://link1.url\n- name: link2\n  url: https://link2.url\n")],
        Package {
            links: vec![link("link1", "https://link1.url"), link("link2", "https://link2.url")],
            ..Default::default()
        },
        None
    )]
    #[case::maintainers_invalid(
        Package::default(),
        &[(MAINTAINERS_ANNOTATION, r#""{\""#)],
        Package::default(),
        Some("invalid maintainers value")
    )]
    #[case::maintainers_invalid_keeps_previous(
        Package { maintainers: vec![maintainer("user1", "user1@email.com")], ..Default::default() },
        &[(MAINTAINERS_ANNOTATION, r#""{\""#)],
        Package { maintainers: vec![maintainer("user1", "user1@email.com")], ..Default::default() },
        Some("invalid maintainers value")
    )]
    #[case::maintainers_set(
        Package::default(),
        &[(MAINTAINERS_ANNOTATION, "\n- name: user1\n  email: user1@email.com\n")],
        Package { maintainers: vec![maintainer("user1", "user1@email.com")], ..Default::default() },
        None
    )]
    #[case::maintainers_replaced(
        Package { maintainers: vec![maintainer("user1", "user1@email.com")], ..Default::default() },
        &[(MAINTAINERS_ANNOTATION, "\n- name: user1-updated\n  email: user1@email.com\n- name: user2\n  email: user2@email.com\n")],
        Package {
            maintainers: vec![
                maintainer("user1-updated", "user1@email.com"),
                maintainer("user2", "user2@email.com"),
            ],
            ..Default::default()
        },
        None
    )]
    #[case::operator_invalid(
        Package::default(),
        &[(OPERATOR_ANNOTATION, "invalid")],
        Package::default(),
        Some("invalid operator value")
    )]
    #[case::operator_true(
        Package::default(),
        &[(OPERATOR_ANNOTATION, "true")],
        Package { is_operator: true, ..Default::default() },
        None
    )]
    #[case::operator_false(
        Package { is_operator: true, ..Default::default() },
        &[(OPERATOR_ANNOTATION, "false")],
        Package::default(),
        None
    )]
    #[case::operator_absent_keeps_value(
        Package { is_operator: true, ..Default::default() },
        &[],
        Package { is_operator: true, ..Default::default() },
        None
    )]
    #[case::operator_capabilities(
        Package::default(),
        &[(OPERATOR_CAPABILITIES_ANNOTATION, "Basic Install")],
        Package { capabilities: "Basic Install".to_string(), ..Default::default() },
        None
    )]
    #[case::prerelease_invalid(
        Package::default(),
        &[(PRERELEASE_ANNOTATION, "invalid")],
        Package::default(),
        Some("invalid prerelease value")
    )]
    #[case::prerelease_true(
        Package::default(),
        &[(PRERELEASE_ANNOTATION, "true")],
        Package { prerelease: true, ..Default::default() },
        None
    )]
    #[case::prerelease_false(
        Package { prerelease: true, ..Default::default() },
        &[(PRERELEASE_ANNOTATION, "false")],
        Package::default(),
        None
    )]
    #[case::prerelease_absent_keeps_value(
        Package { prerelease: true, ..Default::default() },
        &[],
        Package { prerelease: true, ..Default::default() },
        None
    )]
    #[case::security_updates(
        Package::default(),
        &[(SECURITY_UPDATES_ANNOTATION, "true")],
        Package { contains_security_updates: true, ..Default::default() },
        None
    )]
    #[case::security_updates_invalid(
        Package { contains_security_updates: true, ..Default::default() },
        &[(SECURITY_UPDATES_ANNOTATION, "yes please")],
        Package { contains_security_updates: true, ..Default::default() },
        Some("invalid security updates value")
    )]
    #[case::changes_blank_is_noop(
        Package { changes: vec!["Initial release".to_string()], ..Default::default() },
        &[(CHANGES_ANNOTATION, "  \n")],
        Package { changes: vec!["Initial release".to_string()], ..Default::default() },
        None
    )]
    #[case::changes_invalid(
        Package { changes: vec!["Initial release".to_string()], ..Default::default() },
        &[(CHANGES_ANNOTATION, "- name: not a string\n")],
        Package { changes: vec!["Initial release".to_string()], ..Default::default() },
        Some("invalid changes value")
    )]
    fn test_enrich_package_from_annotations(
        #[case] pkg: Package,
        #[case] entries: &[(&str, &str)],
        #[case] expected: Package,
        #[case] expected_err: Option<&str>,
    ) {
        let mut pkg = pkg;
        let result = enrich_package(&mut pkg, &annotations(entries));

        match expected_err {
            Some(msg) => {
                let err = result.unwrap_err();
                assert!(
                    err.to_string().contains(msg),
                    "{err} does not contain {msg}"
                );
            }
            None => result.unwrap(),
        }
        assert_eq!(pkg, expected);
    }

    #[test]
    fn test_crds_and_examples() {
        let mut pkg = Package::default();
        let entries = annotations(&[
            (
                CRDS_ANNOTATION,
                "\n- kind: MyKind\n  version: v1\n  name: mykind\n  displayName: My Kind\n  description: Some nice description\n",
            ),
            (
                CRDS_EXAMPLES_ANNOTATION,
                "\n- apiVersion: v1\n  kind: MyKind\n  metadata:\n    name: mykind\n  spec:\n    replicas: 1\n",
            ),
        ]);

        enrich_package(&mut pkg, &entries).unwrap();

        assert_eq!(
            pkg.crds,
            vec![StructuredValue::map([
                ("kind", "MyKind".into()),
                ("version", "v1".into()),
                ("name", "mykind".into()),
                ("displayName", "My Kind".into()),
                ("description", "Some nice description".into()),
            ])]
        );
        assert_eq!(
            pkg.crds_examples,
            vec![StructuredValue::map([
                ("apiVersion", "v1".into()),
                ("kind", "MyKind".into()),
                ("metadata", StructuredValue::map([("name", "mykind".into())])),
                ("spec", StructuredValue::map([("replicas", 1i64.into())])),
            ])]
        );
    }

    #[test]
    fn test_crds_must_be_mappings() {
        let previous = vec![StructuredValue::map([("kind", "Old".into())])];
        let mut pkg = Package {
            crds: previous.clone(),
            ..Default::default()
        };

        let err = enrich_package(&mut pkg, &annotations(&[(CRDS_ANNOTATION, "- a\n- b\n")]))
            .unwrap_err();

        assert_eq!(err.field, "crds");
        assert_eq!(pkg.crds, previous);
    }

    #[test]
    fn test_one_failure_does_not_block_other_keys() {
        let mut pkg = Package::default();
        let entries = annotations(&[
            (LINKS_ANNOTATION, r#""{\""#),
            (OPERATOR_ANNOTATION, "true"),
            (LICENSE_ANNOTATION, "MIT"),
            (PRERELEASE_ANNOTATION, "maybe"),
        ]);

        let err = enrich_package(&mut pkg, &entries).unwrap_err();

        // Keys are processed in a fixed order; prerelease comes after links.
        assert_eq!(err.field, "prerelease");
        assert!(pkg.is_operator);
        assert_eq!(pkg.license, "MIT");
        assert!(pkg.links.is_empty());
    }
}
