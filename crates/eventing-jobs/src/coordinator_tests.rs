    use super::*;
    use crate::codec::EventCodec;
    use crate::event_bus::LocalEventBus;
    use crate::job::JobResult;
    use eventing_store::MemoryStore;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.jobs.background_load_delay_ms = 0;
        config.jobs.maintenance_interval_secs = 3600;
        config
    }

    fn coordinator(config: &Config) -> (Arc<MemoryStore>, Arc<JobCoordinator>) {
        let store = Arc::new(MemoryStore::new());
        let coordinator = JobCoordinator::new(store.clone(), Arc::new(LocalEventBus::new()), config);
        (store, coordinator)
    }

    #[test]
    fn test_validate_topic() {
        assert!(validate_topic("org/shop/order").is_ok());
        assert!(validate_topic("single").is_ok());
        assert!(matches!(validate_topic(""), Err(JobError::InvalidTopic(_))));
        assert!(validate_topic("/leading").is_err());
        assert!(validate_topic("trailing/").is_err());
        assert!(validate_topic("double//slash").is_err());
    }

    #[test]
    fn test_notification_carries_job_identity() {
        let mut job = Job::new("org/shop").with_id("o-7").with_property("amount", 3);
        job.retry_count = 2;

        let event = notification(TOPIC_JOB_CANCELLED, &job);
        assert_eq!(event.topic, TOPIC_JOB_CANCELLED);
        assert_eq!(event.properties[NOTIFICATION_PROPERTY_JOB_TOPIC], "org/shop");
        assert_eq!(event.properties[NOTIFICATION_PROPERTY_JOB_ID], "o-7");
        assert_eq!(event.properties[NOTIFICATION_PROPERTY_RETRY_COUNT], 2);
        assert_eq!(event.properties["amount"], 3);
    }

    #[test]
    fn test_matches_filters() {
        let job = Job::new("t").with_property("kind", "a").with_property("n", 1);
        let mut filters = Map::new();
        assert!(matches_filters(&job, &filters));
        filters.insert("kind".into(), Value::from("a"));
        assert!(matches_filters(&job, &filters));
        filters.insert("n".into(), Value::from(2));
        assert!(!matches_filters(&job, &filters));
    }

    #[tokio::test]
    async fn test_submit_rejects_invalid_topic() {
        let (_, coordinator) = coordinator(&test_config());
        let result = coordinator.submit("", None, Map::new());
        assert!(matches!(result, Err(JobError::InvalidTopic(_))));
    }

    #[tokio::test]
    async fn test_submit_before_start_fails() {
        let (_, coordinator) = coordinator(&test_config());
        let result = coordinator.submit("org/shop", None, Map::new());
        assert!(matches!(result, Err(JobError::Shutdown)));
    }

    #[tokio::test]
    async fn test_submit_to_drop_queue() {
        let mut config = test_config();
        config
            .queues
            .push(QueueConfig::new("discard", QueueType::Drop).with_topic("noise/*"));
        let (_, coordinator) = coordinator(&config);

        let result = coordinator.submit("noise/tick", None, Map::new());
        assert!(matches!(result, Err(JobError::Dropped(_))));
    }

    #[tokio::test]
    async fn test_queue_settings_override_job_retries() {
        let mut config = test_config();
        let mut queue = QueueConfig::new("mail", QueueType::Unordered).with_topic("mail/*");
        queue.max_retries = Some(2);
        queue.retry_delay_ms = Some(5);
        config.queues.push(queue);
        let (_, coordinator) = coordinator(&config);
        coordinator.start().await.unwrap();

        let job = coordinator.submit("mail/send", None, Map::new()).unwrap();
        assert_eq!(job.max_retries, 2);
        assert_eq!(job.retry_delay, Duration::from_millis(5));

        let other = coordinator.submit("other", None, Map::new()).unwrap();
        assert_eq!(other.max_retries, config.jobs.max_retries);
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_twice() {
        let (_, coordinator) = coordinator(&test_config());
        coordinator.start().await.unwrap();
        assert!(matches!(coordinator.start().await, Err(JobError::AlreadyStarted)));

        coordinator.stop().await;
        coordinator.stop().await;
        assert!(!coordinator.is_running());
    }

    #[tokio::test]
    async fn test_idle_queue_is_reaped_on_second_pass() {
        let (_, coordinator) = coordinator(&test_config());
        coordinator.start().await.unwrap();

        let config = QueueConfig::new("reports", QueueType::Ordered).with_topic("reports/*");
        let handle = coordinator.queue_handle(&config);
        assert_eq!(coordinator.queue_names(), vec!["reports".to_string()]);

        coordinator.reap_idle_queues();
        assert!(handle.queue.is_marked_for_cleanup());
        assert_eq!(coordinator.queue_names().len(), 1);

        coordinator.reap_idle_queues();
        assert!(coordinator.queue_names().is_empty());
        assert!(handle.queue.is_finished());
        assert!(!coordinator.wake_up_queue("reports"));
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_cleanup_history_removes_old_finished_jobs() {
        let mut config = test_config();
        config.jobs.cleanup_period_mins = 0;
        let (store, coordinator) = coordinator(&config);

        let session = store.login().await.unwrap();
        let job = Job::new("org/shop").with_id("done");
        let node_path = EventCodec::node_path("/sling/jobs", &job);
        store.create_path(&session, "/sling/jobs/org/shop").await.unwrap();
        let mut props = EventCodec::encode(&job, "old-node").unwrap();
        props.extend(EventCodec::finished_properties(JobResult::Ok, 0));
        store.add_node(&session, &node_path, props).await.unwrap();

        coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(coordinator.cleanup_history().await.unwrap(), 1);
        assert!(store.get_node(&session, &node_path).await.unwrap().is_none());
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn test_wake_up_unknown_queue() {
        let (_, coordinator) = coordinator(&test_config());
        assert!(!coordinator.wake_up_queue("missing"));
    }
