use super::*;
use crate::types::{
    ContainerOutcome, ContainerPlacement, DeploymentConfig, PlacedContainer, PlacementStrategy,
};
use std::time::Duration;

async fn exercise_stacks(store: &dyn StackStore) {
    let mut web = Stack::new("web", DeploymentConfig::with_strategy(PlacementStrategy::Spread));
    let mut jobs = Stack::new("jobs", DeploymentConfig::default());
    jobs.created_at = web.created_at + Duration::from_secs(1);

    store.save_stack(&web).await.unwrap();
    store.save_stack(&jobs).await.unwrap();
    assert!(matches!(store.save_stack(&web).await, Err(FleetError::Storage(_))));

    let loaded = store.get_stack(&web.id).await.unwrap();
    assert_eq!(loaded, web);

    web.set_status(StackStatus::Running);
    store.update_stack(&web).await.unwrap();
    assert_eq!(store.get_stack(&web.id).await.unwrap().status, StackStatus::Running);

    let all = store.list_stacks(&StackFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, web.id);

    let running = store.list_stacks(&StackFilter::by_status(StackStatus::Running)).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].name, "web");

    let named = store.list_stacks(&StackFilter::by_name("jobs")).await.unwrap();
    assert_eq!(named.len(), 1);
    assert_eq!(named[0].id, jobs.id);

    store.delete_stack(&web.id).await.unwrap();
    assert!(matches!(store.get_stack(&web.id).await, Err(FleetError::StackNotFound { .. })));
    assert!(matches!(store.delete_stack(&web.id).await, Err(FleetError::StackNotFound { .. })));

    let ghost = Stack::new("ghost", DeploymentConfig::default());
    assert!(store.update_stack(&ghost).await.unwrap_err().is_not_found());
}

async fn exercise_deployments(store: &dyn StackStore) {
    let mut deployment = StackDeployment::new("stack-1");
    deployment.containers.push(PlacedContainer {
        placement: ContainerPlacement {
            container: "db".to_string(),
            host_id: "h1".to_string(),
            address: "10.0.0.1".to_string(),
        },
        outcome: ContainerOutcome::running("c0ffee"),
    });

    assert!(matches!(
        store.update_deployment(&deployment).await,
        Err(FleetError::DeploymentNotFound { .. })
    ));

    store.save_deployment(&deployment).await.unwrap();
    assert_eq!(store.get_deployment("stack-1").await.unwrap(), deployment);

    deployment.set_status(StackStatus::Running);
    store.update_deployment(&deployment).await.unwrap();
    assert_eq!(store.get_deployment("stack-1").await.unwrap().status, StackStatus::Running);

    // A new attempt replaces the old record.
    let retry = StackDeployment::new("stack-1");
    store.save_deployment(&retry).await.unwrap();
    assert!(store.get_deployment("stack-1").await.unwrap().containers.is_empty());

    store.delete_deployment("stack-1").await.unwrap();
    assert!(matches!(
        store.get_deployment("stack-1").await,
        Err(FleetError::DeploymentNotFound { .. })
    ));
    assert!(store.delete_deployment("stack-1").await.is_err());
}

#[tokio::test]
async fn test_memory_store() {
    let store = MemoryStore::new();
    exercise_stacks(&store).await;
    exercise_deployments(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_in_memory() {
    let store = SqliteStore::new_in_memory().await.unwrap();
    exercise_stacks(&store).await;
    exercise_deployments(&store).await;
}

#[tokio::test]
async fn test_sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("flotilla.db");

    let stack = Stack::new("persisted", DeploymentConfig::default());
    {
        let store = SqliteStore::new(&path).await.unwrap();
        store.save_stack(&stack).await.unwrap();
        assert_eq!(migrations::version(store.pool()).await.unwrap(), 2);
    }

    let reopened = SqliteStore::new(&path).await.unwrap();
    assert_eq!(reopened.get_stack(&stack.id).await.unwrap(), stack);
}
