//! Property-based tests using proptest
//!
//! These tests check address parsing, storage keys and query matching,
//! plus the AWS property helpers, over randomized inputs.

use proptest::prelude::*;
use serde_json::{json, Map, Value};
use universal_control_plane::controlplane::backends::aws::{
    flatten_properties, generate_patch, unflatten_properties,
};
use universal_control_plane::domain::ports::TypeSchema;
use universal_control_plane::store::keys::{id_matches_query, StorageKey};
use universal_control_plane::{Query, ResourceId};

/// Generate a segment name, including non-ASCII letters
fn arb_name() -> impl Strategy<Value = String> {
    "[a-zA-ZäöüÄÖÜéÉ][a-zA-Z0-9äöüÄÖÜéÉ-]{0,11}".prop_filter("reserved segment", |s| {
        !s.eq_ignore_ascii_case("providers") && !s.eq_ignore_ascii_case("planes")
    })
}

/// Generate `(resource group, provider namespace, type, name)`
fn arb_resource() -> impl Strategy<Value = (String, String, String, String)> {
    (
        arb_name(),
        prop_oneof!["Applications.Core", "Applications.Dapr", "AWS.Kinesis", "Microsoft.Resources"],
        "[a-zA-ZäöüÄÖÜéÉ]{1,12}",
        arb_name(),
    )
}

fn resource_path(group: &str, namespace: &str, type_name: &str, name: &str) -> String {
    format!(
        "/planes/radius/local/resourceGroups/{}/providers/{}/{}/{}",
        group, namespace, type_name, name
    )
}

/// Generate a nested JSON object with no empty keys
fn arb_properties() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z0-9 ]{0,8}".prop_map(|s| json!(s)),
        any::<bool>().prop_map(|b| json!(b)),
    ];
    let tree = leaf.prop_recursive(3, 24, 4, |inner| {
        prop::collection::btree_map("[A-Za-z]{1,6}", inner, 1..4)
            .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>()))
    });
    prop::collection::btree_map("[A-Za-z]{1,6}", tree, 0..5)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>()))
}

proptest! {
    /// Parsing the canonical form gives back an equal ID
    #[test]
    fn canonical_form_round_trips((group, namespace, type_name, name) in arb_resource()) {
        let id = ResourceId::parse(&resource_path(&group, &namespace, &type_name, &name)).unwrap();
        let reparsed = ResourceId::parse(id.as_str()).unwrap();
        prop_assert_eq!(reparsed.as_str(), id.as_str());
        prop_assert_eq!(id.name(), name.as_str());
    }

    /// Equality and storage keys ignore case
    #[test]
    fn case_is_ignored((group, namespace, type_name, name) in arb_resource()) {
        let path = resource_path(&group, &namespace, &type_name, &name);
        let lower = ResourceId::parse(&path.to_lowercase()).unwrap();
        let upper = ResourceId::parse(&path.to_uppercase()).unwrap();
        prop_assert_eq!(&lower, &upper);
        prop_assert_eq!(StorageKey::from_id(&lower), StorageKey::from_id(&upper));
    }

    /// The query built from an ID always selects that ID
    #[test]
    fn query_from_id_matches_itself((group, namespace, type_name, name) in arb_resource()) {
        let id = ResourceId::parse(&resource_path(&group, &namespace, &type_name, &name)).unwrap();
        prop_assert!(id_matches_query(&id, &Query::from_id(&id)));

        let scope = id.truncate();
        prop_assert!(id_matches_query(&scope, &Query::from_id(&scope)));
    }

    /// A type query under one group never selects a resource in another group
    #[test]
    fn type_query_is_scoped_to_its_group(
        (group, namespace, type_name, name) in arb_resource(),
        other in arb_name(),
    ) {
        prop_assume!(group.to_lowercase() != other.to_lowercase());
        let id = ResourceId::parse(&resource_path(&group, &namespace, &type_name, &name)).unwrap();
        let resource_type = id.resource_type();

        let own = Query::resources_of_type(&format!("/planes/radius/local/resourceGroups/{}", group), &resource_type);
        let foreign = Query::resources_of_type(&format!("/planes/radius/local/resourceGroups/{}", other), &resource_type);
        prop_assert!(id_matches_query(&id, &own));
        prop_assert!(!id_matches_query(&id, &foreign));
    }

    /// Flattening then unflattening restores the original object
    #[test]
    fn flatten_round_trips(properties in arb_properties()) {
        let flat = flatten_properties(&properties);
        prop_assert_eq!(unflatten_properties(&flat), properties);
    }

    /// Identical states produce an empty patch
    #[test]
    fn identical_states_need_no_patch(properties in arb_properties()) {
        let patch = generate_patch(&properties, &properties, &TypeSchema::default());
        prop_assert!(patch.is_empty());
    }
}
