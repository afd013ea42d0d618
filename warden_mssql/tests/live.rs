//! Round trips against a real server.
//!
//! Ignored by default. Point `WARDEN_TEST_CONFIG` at a servers file and
//! `WARDEN_TEST_SERVER` at one of its entries (default `test`), then run
//! with `--ignored`. The login needs sysadmin. Each test recreates its own
//! scratch database on start. Pools are held for the life of an engine, so
//! the database is left behind for the next run to drop.

use warden_core::model::{CreateLogin, CreateUser, GrantPermission, Role, UpdateUser};
use warden_core::{CallContext, ErrorKind, PrincipalEngine};
use warden_mssql::MssqlEngine;

async fn engine() -> MssqlEngine {
    warden_core::logging::setup(None);
    let path = std::env::var("WARDEN_TEST_CONFIG").expect("WARDEN_TEST_CONFIG is not set");
    let server = std::env::var("WARDEN_TEST_SERVER").unwrap_or_else(|_| "test".to_owned());
    MssqlEngine::from_config_file(path, &server).await.unwrap()
}

async fn scratch(engine: &MssqlEngine, ctx: &CallContext, name: &str) {
    engine.delete_database(ctx, name).await.unwrap();
    let database = engine.create_database(ctx, name).await.unwrap();
    assert_eq!(engine.get_database_by_id(ctx, database.id).await.unwrap(), database);
}

#[tokio::test]
#[ignore]
async fn contained_user_round_trip() {
    const SCRATCH: &str = "warden_live_contained";
    let engine = engine().await;
    let ctx = CallContext::new();
    scratch(&engine, &ctx, SCRATCH).await;
    engine
        .exec_script(
            &ctx,
            "master",
            "EXEC sp_configure 'contained database authentication', 1\nGO\nRECONFIGURE",
        )
        .await
        .unwrap();
    engine
        .exec_script(
            &ctx,
            "master",
            &format!("ALTER DATABASE [{SCRATCH}] SET CONTAINMENT = PARTIAL"),
        )
        .await
        .unwrap();
    let maxdop = engine
        .set_scoped_configuration(&ctx, SCRATCH, "MAXDOP", "2", None)
        .await
        .unwrap();
    assert_eq!(maxdop.value, "2");

    let user = engine
        .create_user(
            &ctx,
            SCRATCH,
            &CreateUser::contained("alice", "Str0ng!Passw0rd", "dbo"),
        )
        .await
        .unwrap();
    assert_eq!(user.name, "alice");
    assert!(user.sid.starts_with("0x"));
    assert!(user.login_name.is_empty());

    let user = engine
        .update_user(
            &ctx,
            SCRATCH,
            &UpdateUser {
                name: "alice".to_owned(),
                password: None,
                default_schema: Some("guest".to_owned()),
            },
        )
        .await
        .unwrap();
    assert_eq!(user.default_schema, "guest");

    engine.delete_user(&ctx, SCRATCH, "alice").await.unwrap();
    engine.delete_user(&ctx, SCRATCH, "alice").await.unwrap();
    let err = engine.get_user(&ctx, SCRATCH, "alice").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(engine.cached_pools() >= 1);
}

#[tokio::test]
#[ignore]
async fn login_user_role_and_grant() {
    const SCRATCH: &str = "warden_live_grants";
    let engine = engine().await;
    let ctx = CallContext::new();
    scratch(&engine, &ctx, SCRATCH).await;

    engine.delete_login(&ctx, "warden_bob").await.unwrap();
    let login = engine
        .create_login(
            &ctx,
            &CreateLogin {
                name: "warden_bob".to_owned(),
                password: "Str0ng!Passw0rd".to_owned(),
                default_database: Some(SCRATCH.to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!login.disabled);

    let user = engine
        .create_user(
            &ctx,
            SCRATCH,
            &CreateUser::for_login("bob", "warden_bob", "dbo"),
        )
        .await
        .unwrap();
    assert_eq!(user.sid, login.sid);
    assert_eq!(user.login_name, "warden_bob");

    engine
        .create_role(&ctx, SCRATCH, &Role::named("readers"))
        .await
        .unwrap();
    let membership = engine
        .assign_role(&ctx, SCRATCH, "readers", "bob")
        .await
        .unwrap();
    let read = engine
        .read_role_membership(&ctx, SCRATCH, &membership.id)
        .await
        .unwrap();
    assert_eq!(read, membership);

    engine
        .exec_script(&ctx, SCRATCH, "CREATE TABLE dbo.orders (id int)")
        .await
        .unwrap();
    let grant = GrantPermission::on_object(SCRATCH, "readers", "select", "TABLE", "dbo.orders");
    let granted = engine.grant_permission(&ctx, &grant).await.unwrap();
    assert_eq!(granted.permission, "SELECT");
    assert_eq!(granted.object_type.as_deref(), Some("TABLE"));
    let listed = engine
        .list_permissions(&ctx, SCRATCH, "readers")
        .await
        .unwrap();
    assert!(listed
        .iter()
        .any(|p| p.object_name.as_deref() == Some("dbo.orders")));

    engine.revoke_permission(&ctx, &grant).await.unwrap();
    let err = engine.read_permission(&ctx, &grant).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine
        .create_role(&ctx, SCRATCH, &Role::named("readers"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineRejected);

    engine.unassign_role(&ctx, SCRATCH, "readers", "bob").await.unwrap();
    engine.delete_user(&ctx, SCRATCH, "bob").await.unwrap();
    engine.delete_login(&ctx, "warden_bob").await.unwrap();
}
