    use super::*;
    use crate::node::PropertyValue;
    use std::time::Duration;

    fn props(pairs: &[(&str, PropertyValue)]) -> NodeProperties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_path_creates_intermediates() {
        let store = MemoryStore::new();
        let session = store.login().await.unwrap();

        store.create_path(&session, "/sling/jobs/a").await.unwrap();
        assert!(store.get_node(&session, "/sling").await.unwrap().is_some());
        assert!(store.get_node(&session, "/sling/jobs").await.unwrap().is_some());
        assert_eq!(store.node_count(), 3);

        // idempotent
        store.create_path(&session, "/sling/jobs/a").await.unwrap();
        assert_eq!(store.node_count(), 3);
    }

    #[tokio::test]
    async fn test_add_node_requires_parent() {
        let store = MemoryStore::new();
        let session = store.login().await.unwrap();

        let result = store.add_node(&session, "/missing/child", NodeProperties::new()).await;
        assert!(matches!(result, Err(StoreError::PathNotFound(_))));
    }

    #[tokio::test]
    async fn test_add_node_existing() {
        let store = MemoryStore::new();
        let session = store.login().await.unwrap();
        store.create_path(&session, "/jobs").await.unwrap();

        store.add_node(&session, "/jobs/x", NodeProperties::new()).await.unwrap();
        let result = store.add_node(&session, "/jobs/x", NodeProperties::new()).await;
        assert!(matches!(result, Err(StoreError::ItemExists(_))));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_across_sessions() {
        let store = MemoryStore::new();
        let a = store.login().await.unwrap();
        let b = store.login().await.unwrap();
        store.create_path(&a, "/jobs/x").await.unwrap();

        let token = store.try_lock(&a, "/jobs/x").await.unwrap().unwrap();
        assert!(store.try_lock(&b, "/jobs/x").await.unwrap().is_none());

        let node = store.get_node(&b, "/jobs/x").await.unwrap().unwrap();
        assert_eq!(node.lock_owner, Some(a));

        store.unlock(&token).await.unwrap();
        assert!(store.try_lock(&b, "/jobs/x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_locked_node_rejects_foreign_writes() {
        let store = MemoryStore::new();
        let a = store.login().await.unwrap();
        let b = store.login().await.unwrap();
        store.create_path(&a, "/jobs/x").await.unwrap();
        store.try_lock(&a, "/jobs/x").await.unwrap().unwrap();

        let set = props(&[("k", PropertyValue::Long(1))]);
        let result = store.set_properties(&b, "/jobs/x", set.clone(), &[]).await;
        assert!(matches!(result, Err(StoreError::Locked(_))));
        assert!(matches!(store.remove_node(&b, "/jobs/x").await, Err(StoreError::Locked(_))));

        // the owner may write
        store.set_properties(&a, "/jobs/x", set, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_with_stale_token() {
        let store = MemoryStore::new();
        let a = store.login().await.unwrap();
        store.create_path(&a, "/jobs/x").await.unwrap();

        let token = store.try_lock(&a, "/jobs/x").await.unwrap().unwrap();
        store.unlock(&token).await.unwrap();
        assert!(matches!(store.unlock(&token).await, Err(StoreError::NotLockOwner(_))));
    }

    #[tokio::test]
    async fn test_logout_releases_locks() {
        let store = MemoryStore::new();
        let a = store.login().await.unwrap();
        let b = store.login().await.unwrap();
        store.create_path(&a, "/jobs/x").await.unwrap();
        store.try_lock(&a, "/jobs/x").await.unwrap().unwrap();

        let mut sub = store.subscribe("/jobs", ChangeMask::LOCK_RELEASED);
        store.logout(&a).await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::LockReleased);
        assert_eq!(event.path, "/jobs/x");
        assert_eq!(event.session, a);
        assert!(store.try_lock(&b, "/jobs/x").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_crashed_session_leaves_orphaned_lock() {
        let store = MemoryStore::new();
        let a = store.login().await.unwrap();
        store.create_path(&a, "/jobs/x").await.unwrap();
        store.try_lock(&a, "/jobs/x").await.unwrap().unwrap();

        let mut sub = store.subscribe("/jobs", ChangeMask::LOCK_RELEASED);
        store.crash_session(&a);

        let b = store.login().await.unwrap();
        let node = store.get_node(&b, "/jobs/x").await.unwrap().unwrap();
        assert!(!node.is_locked());
        assert!(store.try_lock(&b, "/jobs/x").await.unwrap().is_some());

        // a crash is silent
        let waited = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_closed_session_rejected() {
        let store = MemoryStore::new();
        let a = store.login().await.unwrap();
        store.logout(&a).await.unwrap();

        let result = store.get_node(&a, "/").await;
        assert!(matches!(result, Err(StoreError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.login().await, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_remove_node_removes_subtree_only() {
        let store = MemoryStore::new();
        let s = store.login().await.unwrap();
        store.create_path(&s, "/jobs/a/b").await.unwrap();
        store.create_path(&s, "/jobs/a b").await.unwrap();

        store.remove_node(&s, "/jobs/a").await.unwrap();
        assert!(store.get_node(&s, "/jobs/a/b").await.unwrap().is_none());
        assert!(store.get_node(&s, "/jobs/a b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_query_conditions_and_lock_filter() {
        let store = MemoryStore::new();
        let s = store.login().await.unwrap();
        store.create_path(&s, "/jobs/t").await.unwrap();

        for (name, active) in [("one", true), ("two", false), ("three", true)] {
            let p = props(&[
                ("event:topic", PropertyValue::from("t")),
                ("event:active", PropertyValue::Boolean(active)),
            ]);
            store.add_node(&s, &format!("/jobs/t/{}", name), p).await.unwrap();
        }
        store.try_lock(&s, "/jobs/t/three").await.unwrap().unwrap();

        let all = NodeQuery::descendants_of("/jobs").where_exists("event:topic");
        assert_eq!(store.query(&s, &all).await.unwrap().len(), 3);

        let active = all.clone().where_eq("event:active", true);
        let nodes = store.query(&s, &active).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name(), "one");

        let queued = active.clone().locked(false);
        let nodes = store.query(&s, &queued).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name(), "one");

        let limited = all.with_limit(1);
        assert_eq!(store.query(&s, &limited).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_filters_prefix_and_mask() {
        let store = MemoryStore::new();
        let s = store.login().await.unwrap();
        let mut sub = store.subscribe("/jobs", ChangeMask::NODE_REMOVED);

        store.create_path(&s, "/other/x").await.unwrap();
        store.remove_node(&s, "/other/x").await.unwrap();
        store.create_path(&s, "/jobs/y").await.unwrap();
        store.remove_node(&s, "/jobs/y").await.unwrap();

        let event = sub.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::NodeRemoved);
        assert_eq!(event.path, "/jobs/y");
    }

    #[tokio::test]
    async fn test_only_a_live_foreign_lock_blocks_writes() {
        let store = MemoryStore::new();
        let a = store.login().await.unwrap();
        let b = store.login().await.unwrap();
        store.create_path(&a, "/jobs/x").await.unwrap();
        store.try_lock(&a, "/jobs/x").await.unwrap().unwrap();

        let mut props = crate::node::NodeProperties::new();
        props.insert("k".to_string(), PropertyValue::from("v"));
        let blocked = store.set_properties(&b, "/jobs/x", props.clone(), &[]).await;
        assert!(matches!(blocked, Err(StoreError::Locked(_))));
        store.set_properties(&a, "/jobs/x", props.clone(), &[]).await.unwrap();

        store.crash_session(&a);
        store.set_properties(&b, "/jobs/x", props, &[]).await.unwrap();
        store.remove_node(&b, "/jobs/x").await.unwrap();
    }
