//! Permission entity - the `(resource, action, scope)` triple owned by a role.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "permission")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub role_id: i64,
    pub resource: String,
    pub action: String,
    pub scope: String,
    /// Position inside the owning role's ordered permission list.
    pub position: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::role::Entity",
        from = "Column::RoleId",
        to = "super::role::Column::Id"
    )]
    Role,
}

impl Related<super::role::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Role.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Wire form used in access-token claims.
    pub fn claim_string(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }

    /// Match on `(resource, action)`; scope participation is a collaborator
    /// decision and is ignored here.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        self.resource == resource && self.action == action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permission(resource: &str, action: &str) -> Model {
        Model {
            id: 1,
            role_id: 1,
            resource: resource.into(),
            action: action.into(),
            scope: "own".into(),
            position: 0,
        }
    }

    #[test]
    fn claim_string_is_resource_colon_action() {
        assert_eq!(permission("tests", "run").claim_string(), "tests:run");
    }

    #[test]
    fn matches_ignores_scope() {
        let p = permission("tests", "run");
        assert!(p.matches("tests", "run"));
        assert!(!p.matches("tests", "delete"));
        assert!(!p.matches("results", "run"));
    }
}
