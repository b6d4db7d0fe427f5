    use super::*;
    use eventing_store::{MemoryStore, PropertyValue};

    struct Recorder {
        engine: PersistenceEngine,
        dispatched: Mutex<Vec<EventInfo>>,
    }

    #[async_trait]
    impl EngineHandler for Recorder {
        fn engine(&self) -> &PersistenceEngine {
            &self.engine
        }

        async fn on_dispatch(self: Arc<Self>, info: EventInfo) -> Result<()> {
            self.dispatched.lock().push(info);
            Ok(())
        }
    }

    fn recorder(store: Arc<MemoryStore>) -> Arc<Recorder> {
        Arc::new(Recorder {
            engine: PersistenceEngine::new(store, "/sling/jobs", "test-app"),
            dispatched: Mutex::new(Vec::new()),
        })
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_start_fails_when_store_unavailable() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let handler = recorder(store);

        let result = handler.engine.start(handler.clone()).await;
        assert!(matches!(result, Err(JobError::FatalSession(_))));
        assert!(!handler.engine.is_running());
        assert!(matches!(handler.engine.submit(Job::new("t")), Err(JobError::Shutdown)));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let handler = recorder(Arc::new(MemoryStore::new()));
        handler.engine.start(handler.clone()).await.unwrap();
        let result = handler.engine.start(handler.clone()).await;
        assert!(matches!(result, Err(JobError::AlreadyStarted)));
        handler.engine.shutdown().await;
        handler.engine.close_sessions().await;
    }

    #[tokio::test]
    async fn test_submit_persists_then_dispatches() {
        let store = Arc::new(MemoryStore::new());
        let handler = recorder(store.clone());
        handler.engine.start(handler.clone()).await.unwrap();

        let job = Job::new("org/shop").with_id("o-1").with_property("amount", 12);
        handler.engine.submit(job.clone()).unwrap();

        assert!(wait_for(|| handler.dispatched.lock().len() == 1).await);
        let info = handler.dispatched.lock()[0].clone();
        let node_path = info.node_path.unwrap();
        assert_eq!(node_path, EventCodec::node_path("/sling/jobs", &job));

        let session = store.login().await.unwrap();
        let node = store.get_node(&session, &node_path).await.unwrap().unwrap();
        assert_eq!(node.property("amount"), Some(&PropertyValue::Long(12)));
        assert_eq!(handler.engine.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_locked_existing_node_drops_write() {
        let store = Arc::new(MemoryStore::new());
        let handler = recorder(store.clone());
        handler.engine.start(handler.clone()).await.unwrap();

        let job = Job::new("t").with_id("same");
        let node_path = EventCodec::node_path("/sling/jobs", &job);
        let other = store.login().await.unwrap();
        store.create_path(&other, &node_path).await.unwrap();
        store.try_lock(&other, &node_path).await.unwrap().unwrap();

        handler.engine.submit(job).unwrap();
        assert!(wait_for(|| handler.engine.pending_count() == 0).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(handler.dispatched.lock().is_empty());
        let node = store.get_node(&other, &node_path).await.unwrap().unwrap();
        assert_eq!(node.lock_owner, Some(other));
        assert!(node.properties.is_empty());
    }

    #[tokio::test]
    async fn test_unlocked_existing_node_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        let handler = recorder(store.clone());
        handler.engine.start(handler.clone()).await.unwrap();

        handler.engine.submit(Job::new("t").with_id("x").with_property("v", 1)).unwrap();
        handler.engine.submit(Job::new("t").with_id("x").with_property("v", 2)).unwrap();
        assert!(wait_for(|| handler.dispatched.lock().len() == 2).await);

        let session = store.login().await.unwrap();
        let node_path = handler.dispatched.lock()[1].node_path.clone().unwrap();
        let node = store.get_node(&session, &node_path).await.unwrap().unwrap();
        assert_eq!(node.property("v"), Some(&PropertyValue::Long(2)));
    }

    #[tokio::test]
    async fn test_dispatch_order_follows_writes() {
        let handler = recorder(Arc::new(MemoryStore::new()));
        handler.engine.start(handler.clone()).await.unwrap();

        let jobs: Vec<Job> = (0..5).map(|_| Job::new("t")).collect();
        for job in &jobs {
            handler.engine.submit(job.clone()).unwrap();
        }
        assert!(wait_for(|| handler.dispatched.lock().len() == 5).await);

        let ids: Vec<String> = handler.dispatched.lock().iter().map(|i| i.job.id.clone()).collect();
        let expected: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting_work() {
        let store = Arc::new(MemoryStore::new());
        let handler = recorder(store.clone());
        handler.engine.start(handler.clone()).await.unwrap();
        let writer = handler.engine.writer_session().unwrap();

        handler.engine.shutdown().await;
        assert!(!handler.engine.is_running());
        assert!(matches!(handler.engine.submit(Job::new("t")), Err(JobError::Shutdown)));

        handler.engine.close_sessions().await;
        assert!(handler.engine.writer_session().is_err());
        assert!(store.get_node(&writer, "/").await.is_err());
    }
