//! Field-level element checks.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::element::{Element, ElementKind};
use crate::error::ValidationError;

/// Checks an element before it is appended to the log.
pub trait Validator: Send + Sync {
    /// Every problem found, in field order. Empty when the element is acceptable.
    fn validate(&self, element: &Element) -> Vec<ValidationError>;
}

/// Rules for the four element kinds.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, element: &Element) -> Vec<ValidationError> {
        let mut errs = Vec::new();

        if element.kind.is_feature() {
            match element.changeset.as_deref() {
                None => errs.push(ValidationError::new("changeset", "is missing")),
                Some("") => errs.push(ValidationError::new("changeset", "must not be empty")),
                Some(_) => {}
            }
        }

        if let Some(ts) = element.timestamp.as_deref() {
            if DateTime::parse_from_rfc3339(ts).is_err() {
                errs.push(ValidationError::new(
                    "timestamp",
                    "must be an RFC 3339 UTC timestamp",
                ));
            }
        }

        match element.kind {
            ElementKind::Node => {
                check_coordinate(&mut errs, "lat", element.lat.as_deref(), 90.0);
                check_coordinate(&mut errs, "lon", element.lon.as_deref(), 180.0);
            }
            ElementKind::Way => match &element.refs {
                None => errs.push(ValidationError::new("refs", "is missing")),
                Some(refs) if refs.len() < 3 => errs.push(ValidationError::new(
                    "refs",
                    "must name at least 3 nodes",
                )),
                Some(refs) => {
                    if refs.iter().any(|r| r.as_str().is_empty()) {
                        errs.push(ValidationError::new("refs", "must not contain empty ids"));
                    }
                }
            },
            ElementKind::Relation => {
                match &element.tags {
                    None => errs.push(ValidationError::new("tags", "is missing")),
                    Some(tags) if tags.is_empty() => {
                        errs.push(ValidationError::new("tags", "must not be empty"))
                    }
                    Some(_) => {}
                }
                match &element.members {
                    None => errs.push(ValidationError::new("members", "is missing")),
                    Some(members) => {
                        if members.iter().any(|m| m.id.as_str().is_empty()) {
                            errs.push(ValidationError::new(
                                "members",
                                "every member needs a non-empty id",
                            ));
                        }
                    }
                }
            }
            ElementKind::Changeset => {}
        }

        errs
    }
}

fn check_coordinate(errs: &mut Vec<ValidationError>, field: &str, value: Option<&str>, bound: f64) {
    let Some(raw) = value else {
        errs.push(ValidationError::new(field, "is missing"));
        return;
    };
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && (-bound..=bound).contains(&n) => {}
        Ok(_) => errs.push(ValidationError::new(
            field,
            format!("must be between -{bound} and {bound}"),
        )),
        Err(_) => errs.push(ValidationError::new(field, "must be a decimal number")),
    }
}

/// Current UTC time with millisecond precision, e.g. `2017-10-10T19:55:08.570Z`.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Fill fields the caller may omit.
pub fn populate_defaults(element: &mut Element) {
    if element.timestamp.is_none() {
        element.timestamp = Some(now_timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Member;
    use std::collections::BTreeMap;

    fn first_field(element: &Element) -> Option<String> {
        DefaultValidator
            .validate(element)
            .into_iter()
            .next()
            .map(|e| e.field)
    }

    #[test]
    fn good_elements_pass() {
        let tags = BTreeMap::from([("waterway".to_string(), "river".to_string())]);
        for elm in [
            Element::node("9", "-11", "-10").with_timestamp("2017-10-10T19:55:08.570Z"),
            Element::way("19", ["bob", "dole", "for", "prez"]),
            Element::relation("19", tags.clone(), vec![Member::new(ElementKind::Node, "101")]),
            Element::relation("21", tags, Vec::new()),
            Element::changeset(),
        ] {
            assert!(DefaultValidator.validate(&elm).is_empty(), "{elm:?}");
        }
    }

    #[test]
    fn bad_nodes_fail() {
        let mut missing_changeset = Element::node("9", "1", "1");
        missing_changeset.changeset = None;
        assert_eq!(first_field(&missing_changeset).as_deref(), Some("changeset"));

        let mut missing_lon = Element::node("9", "12", "0");
        missing_lon.lon = None;
        assert_eq!(first_field(&missing_lon).as_deref(), Some("lon"));

        for (lat, lon, field) in [
            ("-91", "-7", "lat"),
            ("291", "-7", "lat"),
            ("31", "-185", "lon"),
            ("31", "185", "lon"),
            ("north", "1", "lat"),
        ] {
            assert_eq!(
                first_field(&Element::node("9", lat, lon)).as_deref(),
                Some(field)
            );
        }

        let soon = Element::node("9", "31", "85").with_timestamp("soon");
        assert_eq!(first_field(&soon).as_deref(), Some("timestamp"));
    }

    #[test]
    fn bad_ways_and_relations_fail() {
        assert_eq!(
            first_field(&Element::way("14", ["hi", "there"])).as_deref(),
            Some("refs")
        );
        let mut no_refs = Element::way("14", ["a", "b", "c"]);
        no_refs.refs = None;
        assert_eq!(first_field(&no_refs).as_deref(), Some("refs"));

        let empty_tags = Element::relation("21", BTreeMap::new(), Vec::new());
        assert_eq!(first_field(&empty_tags).as_deref(), Some("tags"));

        let mut no_members = Element::changeset().with_tag("foo", "bar");
        no_members.kind = ElementKind::Relation;
        no_members.changeset = Some("21".into());
        assert_eq!(first_field(&no_members).as_deref(), Some("members"));

        let bad_changeset = Element::changeset().with_timestamp("now");
        assert_eq!(first_field(&bad_changeset).as_deref(), Some("timestamp"));
    }

    #[test]
    fn default_timestamp_has_millis() {
        let mut elm = Element::changeset();
        populate_defaults(&mut elm);
        let ts = elm.timestamp.unwrap();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2017-10-10T19:55:08.570Z".len());
    }
}
