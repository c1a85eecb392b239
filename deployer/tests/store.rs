//! Store backends: persistence, conditional updates and references

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use fs2::FileExt;
use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use tokio_test::assert_ok;

use ezdeploy::errors::AppError;
use ezdeploy::filesys::file::File;
use ezdeploy::models::deployment::{
    DeploymentFilter, DeploymentPatch, DeploymentStatus, LogEntry, NewDeployment,
};
use ezdeploy::models::framework::Framework;
use ezdeploy::models::project::{NewProject, SourceAccount};
use ezdeploy::store::{JsonStore, MemoryStore, Store};

fn new_project(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        repository_url: format!("https://github.com/acme/{}", name.to_lowercase()),
        branch: "main".to_string(),
        framework: None,
        owner: "alice".to_string(),
    }
}

async fn pending(store: &dyn Store, project_id: u64, environment_id: Option<u64>) -> u64 {
    store
        .insert_deployment(NewDeployment {
            project_id,
            commit_hash: "abc123".to_string(),
            branch: "main".to_string(),
            environment_id,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_json_store_persists_across_instances() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("state").join("db.json");

    let first = JsonStore::new(File::new(&path));
    let project = first.insert_project(new_project("Blog")).await.unwrap();
    first.set_project_framework(project.id, Framework::Static).await.unwrap();
    let env = first.get_or_create_environment(project.id, "production").await.unwrap();
    let id = pending(&first, project.id, Some(env.id)).await;
    first
        .update_deployment(
            id,
            DeploymentStatus::Pending,
            DeploymentPatch::status(DeploymentStatus::Building)
                .with_log(LogEntry::info("Cloning repository...")),
        )
        .await
        .unwrap();
    let at = Utc.with_ymd_and_hms(2024, 5, 10, 3, 0, 0).unwrap();
    first.set_watermark("reaper.last_run", at).await.unwrap();
    drop(first);

    let second = JsonStore::new(File::new(&path));
    let project = second.get_project(project.id).await.unwrap();
    assert_eq!(project.framework, Some(Framework::Static));
    let deployment = second.get_deployment(id).await.unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Building);
    assert_eq!(deployment.environment_id, Some(env.id));
    assert!(deployment.log_contains("Cloning repository..."));
    assert_eq!(second.get_watermark("reaper.last_run").await.unwrap(), Some(at));

    // ids keep counting after a reload
    let next = pending(&second, project.id, None).await;
    assert!(next > id);
}

#[tokio::test]
async fn test_json_store_ignores_leftover_lock_file() {
    let tmp = tempfile::tempdir().unwrap();
    // a holder that died leaves the file but not the lock
    std::fs::write(tmp.path().join("db.lock"), "").unwrap();
    let store = JsonStore::new(File::new(tmp.path().join("db.json")));

    let started = Instant::now();
    let project = assert_ok!(store.insert_project(new_project("Blog")).await);
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(store.get_project(project.id).await.unwrap().name, "Blog");
}

#[tokio::test]
async fn test_json_store_waits_for_lock_holder() {
    let tmp = tempfile::tempdir().unwrap();
    let lock_path = tmp.path().join("db.lock");
    let holder = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)
        .unwrap();
    holder.lock_exclusive().unwrap();

    let store = Arc::new(JsonStore::new(File::new(tmp.path().join("db.json"))));
    let writer = {
        let store = store.clone();
        tokio::spawn(async move { store.insert_project(new_project("Blog")).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!writer.is_finished());
    assert!(store.list_deployments(DeploymentFilter::default()).await.is_ok());

    FileExt::unlock(&holder).unwrap();
    let project = writer.await.unwrap().unwrap();
    assert_eq!(project.name, "Blog");
}

#[tokio::test]
async fn test_json_store_empty_file_reads_as_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let store = JsonStore::new(File::new(tmp.path().join("db.json")));

    let all = store.list_deployments(DeploymentFilter::default()).await.unwrap();
    assert!(all.is_empty());
    assert!(matches!(store.get_deployment(1).await, Err(AppError::NotFound(_))));
    assert_eq!(store.get_watermark("reaper.last_run").await.unwrap(), None);
}

#[tokio::test]
async fn test_json_store_concurrent_claim() {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonStore::new(File::new(tmp.path().join("db.json"))));
    let project = store.insert_project(new_project("Blog")).await.unwrap();
    let id = pending(store.as_ref(), project.id, None).await;

    let claims = (0..4).map(|_| {
        let store = store.clone();
        async move {
            store
                .update_deployment(
                    id,
                    DeploymentStatus::Pending,
                    DeploymentPatch::status(DeploymentStatus::Building),
                )
                .await
        }
    });
    let results = join_all(claims).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| e.is_conflict()));
}

#[tokio::test]
async fn test_memory_store_concurrent_claim() {
    let store = Arc::new(MemoryStore::new());
    let project = store.insert_project(new_project("Blog")).await.unwrap();
    let id = pending(store.as_ref(), project.id, None).await;

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_deployment(
                        id,
                        DeploymentStatus::Pending,
                        DeploymentPatch::status(DeploymentStatus::Building),
                    )
                    .await
                    .is_ok()
            })
        })
        .collect();

    let mut won = 0;
    for handle in handles {
        if handle.await.unwrap() {
            won += 1;
        }
    }
    assert_eq!(won, 1);
}

#[tokio::test]
async fn test_conflict_and_invalid_transition() {
    let store = MemoryStore::new();
    let project = store.insert_project(new_project("Blog")).await.unwrap();
    let id = pending(&store, project.id, None).await;

    let conflict = store
        .update_deployment(
            id,
            DeploymentStatus::Building,
            DeploymentPatch::status(DeploymentStatus::Deployed),
        )
        .await;
    match conflict {
        Err(AppError::StoreConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, DeploymentStatus::Building);
            assert_eq!(actual, DeploymentStatus::Pending);
        }
        other => panic!("expected conflict, got {:?}", other),
    }

    let skipped = store
        .update_deployment(
            id,
            DeploymentStatus::Pending,
            DeploymentPatch::status(DeploymentStatus::Deployed),
        )
        .await;
    assert!(matches!(skipped, Err(AppError::InvalidTransition(_))));

    // rejected writes leave the record untouched
    let deployment = store.get_deployment(id).await.unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Pending);
    assert!(deployment.logs.is_empty());

    store
        .update_deployment(
            id,
            DeploymentStatus::Pending,
            DeploymentPatch::status(DeploymentStatus::Failed),
        )
        .await
        .unwrap();
    let reopened = store
        .update_deployment(
            id,
            DeploymentStatus::Failed,
            DeploymentPatch::status(DeploymentStatus::Pending),
        )
        .await;
    assert!(matches!(reopened, Err(AppError::InvalidTransition(_))));
}

#[tokio::test]
async fn test_environment_lifecycle() {
    let store = MemoryStore::new();
    let project = store.insert_project(new_project("Blog")).await.unwrap();

    let production = store.get_or_create_environment(project.id, "production").await.unwrap();
    let again = store.get_or_create_environment(project.id, "production").await.unwrap();
    assert_eq!(production.id, again.id);
    let staging = store.get_or_create_environment(project.id, "staging").await.unwrap();
    assert_ne!(production.id, staging.id);

    let mut variables = BTreeMap::new();
    variables.insert("API_KEY".to_string(), "k".to_string());
    let updated = store
        .set_environment_variables(production.id, variables.clone())
        .await
        .unwrap();
    assert_eq!(updated.variables, variables);

    let first = pending(&store, project.id, Some(production.id)).await;
    let second = pending(&store, project.id, Some(staging.id)).await;

    assert_ok!(store.delete_environment(production.id).await);
    assert_eq!(store.get_environment(production.id).await.unwrap(), None);
    assert_eq!(store.get_deployment(first).await.unwrap().environment_id, None);
    assert_eq!(
        store.get_deployment(second).await.unwrap().environment_id,
        Some(staging.id)
    );
    assert!(matches!(
        store.delete_environment(production.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_insert_deployment_checks_references() {
    let store = MemoryStore::new();
    let blog = store.insert_project(new_project("Blog")).await.unwrap();
    let shop = store.insert_project(new_project("Shop")).await.unwrap();
    let shop_env = store.get_or_create_environment(shop.id, "production").await.unwrap();

    let missing_project = store
        .insert_deployment(NewDeployment {
            project_id: 999,
            commit_hash: "abc123".to_string(),
            branch: "main".to_string(),
            environment_id: None,
        })
        .await;
    assert!(matches!(missing_project, Err(AppError::NotFound(_))));

    let foreign_env = store
        .insert_deployment(NewDeployment {
            project_id: blog.id,
            commit_hash: "abc123".to_string(),
            branch: "main".to_string(),
            environment_id: Some(shop_env.id),
        })
        .await;
    assert!(matches!(foreign_env, Err(AppError::StorageError(_))));
}

#[tokio::test]
async fn test_read_log_pages() {
    let store = MemoryStore::new();
    let project = store.insert_project(new_project("Blog")).await.unwrap();
    let id = pending(&store, project.id, None).await;
    let entries = (0..5).map(|i| LogEntry::info(format!("line {}", i))).collect();
    store.append_log(id, entries).await.unwrap();

    let page = store.read_log(id, 1, 2).await.unwrap();
    let messages: Vec<_> = page.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["line 1", "line 2"]);
    assert!(store.read_log(id, 10, 2).await.unwrap().is_empty());
    assert_eq!(store.read_log(id, 3, 100).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_accounts_and_project_timestamps() {
    let store = MemoryStore::new();
    let project = store.insert_project(new_project("Blog")).await.unwrap();
    assert!(project.last_deployed.is_none());
    assert!(store.get_account("alice").await.unwrap().is_none());

    let account = SourceAccount {
        owner: "alice".to_string(),
        username: "alice-gh".to_string(),
        access_token: SecretString::from("t0"),
    };
    store.upsert_account(account.clone()).await.unwrap();
    store
        .upsert_account(SourceAccount {
            access_token: SecretString::from("t1"),
            ..account
        })
        .await
        .unwrap();
    let stored = store.get_account("alice").await.unwrap().unwrap();
    assert_eq!(stored.access_token.expose_secret(), "t1");

    let at = Utc::now();
    store.mark_project_deployed(project.id, at).await.unwrap();
    assert_eq!(store.get_project(project.id).await.unwrap().last_deployed, Some(at));
}
