//! Session record mappers
//!
//! Conversions between cached identities and their serialized form in the
//! session store

use crate::contract::{Condition, Permissions, TablePermission, UserData};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ===== Identity Conversions =====

pub fn encode_identity(identity: &UserData) -> anyhow::Result<String> {
    Ok(serde_json::to_string(&UserDataJson::from(identity))?)
}

pub fn decode_identity(raw: &str) -> anyhow::Result<UserData> {
    let json: UserDataJson = serde_json::from_str(raw)?;
    Ok(json.into())
}

// ===== JSON Helper Structs =====

#[derive(Debug, Serialize, Deserialize)]
struct UserDataJson {
    id: i64,
    uuid: String,
    org_id: i64,
    #[serde(default)]
    permissions: BTreeMap<String, TablePermissionJson>,
}

/// Column -> permitted values; an empty map is unconditional
type ConditionJson = BTreeMap<String, Vec<String>>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TablePermissionJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    r: Option<ConditionJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    c: Option<ConditionJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    u: Option<ConditionJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<ConditionJson>,
}

impl From<&UserData> for UserDataJson {
    fn from(identity: &UserData) -> Self {
        let permissions = identity
            .permissions
            .tables
            .iter()
            .map(|(table, p)| (table.clone(), TablePermissionJson::from(p)))
            .collect();
        Self {
            id: identity.id,
            uuid: identity.token.clone(),
            org_id: identity.org_id,
            permissions,
        }
    }
}

impl From<UserDataJson> for UserData {
    fn from(json: UserDataJson) -> Self {
        let tables = json
            .permissions
            .into_iter()
            .map(|(table, p)| (table, p.into()))
            .collect();
        Self {
            id: json.id,
            token: json.uuid,
            org_id: json.org_id,
            permissions: Permissions { tables },
        }
    }
}

impl From<&TablePermission> for TablePermissionJson {
    fn from(p: &TablePermission) -> Self {
        let columns = |c: &Option<Condition>| c.as_ref().map(|c| c.columns.clone());
        Self {
            r: columns(&p.read),
            c: columns(&p.create),
            u: columns(&p.update),
            d: columns(&p.delete),
        }
    }
}

impl From<TablePermissionJson> for TablePermission {
    fn from(json: TablePermissionJson) -> Self {
        let condition = |c: Option<ConditionJson>| c.map(|columns| Condition { columns });
        Self {
            read: condition(json.r),
            create: condition(json.c),
            update: condition(json.u),
            delete: condition(json.d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::PermissionKind;

    #[test]
    fn test_identity_survives_the_session_store_format() {
        let mut permissions = Permissions::default();
        permissions.add("widget", PermissionKind::Read, "", "").unwrap();
        permissions
            .add("widget", PermissionKind::Create, "color", "red")
            .unwrap();
        let identity = UserData {
            id: 4,
            token: "t-1".to_string(),
            org_id: 2,
            permissions,
        };

        let raw = encode_identity(&identity).unwrap();
        assert!(raw.contains("\"r\":{}"));
        assert!(!raw.contains("\"u\""));
        assert_eq!(decode_identity(&raw).unwrap(), identity);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_identity("not json").is_err());
    }
}
