//! Variable substitution and avatar-derived defaults.
//!
//! Dialog and evaluation text may carry `{{name}}` tokens. Substitution is
//! restricted to the variable names an event explicitly lists; tokens for
//! unknown or unlisted names are left in place so authoring mistakes stay
//! visible instead of silently vanishing.

use crate::model::MemberProfile;
use std::collections::HashMap;

/// Replace `{{name}}` tokens in `text` for each name in `names`, using the
/// experience variable map.
pub fn substitute(text: &str, names: &[String], variables: &HashMap<String, String>) -> String {
    if names.is_empty() || !text.contains("{{") {
        return text.to_string();
    }
    let mut result = text.to_string();
    for name in names {
        if let Some(value) = variables.get(name) {
            let token = format!("{{{{{name}}}}}");
            result = result.replace(&token, value);
        }
    }
    result
}

/// Seed generic avatar-derived variables into a fresh variable store.
///
/// The set of derivable names is enumerated here; there is no dynamic
/// path lookup against the member profile.
pub fn seed_avatar_defaults(variables: &mut HashMap<String, String>, profile: &MemberProfile) {
    let defaults: [(&str, Option<String>); 2] = [
        ("member_name", Some(profile.member_name.clone())),
        ("avatar_name", profile.avatar_name.clone()),
    ];
    for (name, value) in defaults {
        if let Some(value) = value {
            variables.entry(name.to_string()).or_insert(value);
        }
    }
}
