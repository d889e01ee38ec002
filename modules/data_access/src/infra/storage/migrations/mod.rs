//! Database migrations for the account tables

use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_org_and_roles::Migration),
            Box::new(m20250301_000002_create_auth_user::Migration),
            Box::new(m20250301_000003_create_permissions::Migration),
        ]
    }
}

mod m20250301_000001_create_org_and_roles {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_org_and_roles"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Org::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Org::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(Org::Name).string().not_null().default(""))
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UserRole::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserRole::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(UserRole::Role)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(UserRole::Description)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UserRole::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Org::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Org {
        Table,
        Id,
        Name,
    }

    #[derive(DeriveIden)]
    enum UserRole {
        Table,
        Id,
        Role,
        Description,
    }
}

mod m20250301_000002_create_auth_user {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_auth_user"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // username/email uniqueness is enforced by the engine; users
            // created from an external identity carry an empty username
            manager
                .create_table(
                    Table::create()
                        .table(AuthUser::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(AuthUser::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(AuthUser::Username).string().not_null().default(""))
                        .col(ColumnDef::new(AuthUser::Email).string().not_null().default(""))
                        .col(ColumnDef::new(AuthUser::Password).string().not_null().default(""))
                        .col(
                            ColumnDef::new(AuthUser::UserRoleId)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(AuthUser::IsActive)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(AuthUser::OrgId).big_integer().not_null().default(0))
                        .col(
                            ColumnDef::new(AuthUser::FacebookId)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(AuthUser::GoogleId).string().not_null().default(""))
                        .col(
                            ColumnDef::new(AuthUser::DateAdd)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .col(
                            ColumnDef::new(AuthUser::DateUpd)
                                .timestamp_with_time_zone()
                                .not_null()
                                .default(Expr::current_timestamp()),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_auth_user_org")
                        .table(AuthUser::Table)
                        .col(AuthUser::OrgId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(AuthUser::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum AuthUser {
        Table,
        Id,
        Username,
        Email,
        Password,
        UserRoleId,
        IsActive,
        OrgId,
        FacebookId,
        GoogleId,
        DateAdd,
        DateUpd,
    }
}

mod m20250301_000003_create_permissions {
    use super::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_permissions"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(UserPermission::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserPermission::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(UserPermission::AuthUserId)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(UserPermission::TableName)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(UserPermission::ColumnName)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(ColumnDef::new(UserPermission::Value).string().not_null().default(""))
                        .col(
                            ColumnDef::new(UserPermission::Permission)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(UserPermission::OrgId)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_user_permission_user")
                        .table(UserPermission::Table)
                        .col(UserPermission::AuthUserId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(UserRolePermission::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(UserRolePermission::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(UserRolePermission::TableName)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(UserRolePermission::ColumnName)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(UserRolePermission::Value)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(UserRolePermission::Permission)
                                .string()
                                .not_null()
                                .default(""),
                        )
                        .col(
                            ColumnDef::new(UserRolePermission::UserRoleId)
                                .big_integer()
                                .not_null()
                                .default(0),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_user_role_permission_role")
                        .table(UserRolePermission::Table)
                        .col(UserRolePermission::UserRoleId)
                        .if_not_exists()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(UserRolePermission::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(UserPermission::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum UserPermission {
        Table,
        Id,
        AuthUserId,
        TableName,
        ColumnName,
        Value,
        Permission,
        OrgId,
    }

    #[derive(DeriveIden)]
    enum UserRolePermission {
        Table,
        Id,
        TableName,
        ColumnName,
        Value,
        Permission,
        UserRoleId,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_migration_names_are_unique_and_ordered() {
        let names: Vec<String> = Migrator::migrations()
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len(), "duplicate names: {:?}", names);

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(sorted, names);
        assert!(names.iter().all(|n| n.starts_with("m2025")));
    }
}
