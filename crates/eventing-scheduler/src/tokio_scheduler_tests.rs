    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct CountingTask {
        count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl ScheduledTask for CountingTask {
        async fn execute(&self, _ctx: ScheduleContext) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Arc<dyn ScheduledTask>, Arc<AtomicU32>) {
        let count = Arc::new(AtomicU32::new(0));
        (Arc::new(CountingTask { count: count.clone() }), count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_job_fires_repeatedly() {
        let scheduler = TokioScheduler::new();
        let (task, count) = counting();

        scheduler
            .add_periodic_job("tick", task, ScheduleConfig::new(), Duration::from_millis(100))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(
            scheduler.schedule_of("tick"),
            Some(ScheduleKind::Periodic(Duration::from_millis(100)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_stops_periodic_job() {
        let scheduler = TokioScheduler::new();
        let (task, count) = counting();

        scheduler
            .add_periodic_job("tick", task, ScheduleConfig::new(), Duration::from_millis(100))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.remove_job("tick").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        let scheduler = TokioScheduler::new();
        let (task, _) = counting();
        let result = scheduler.add_periodic_job("x", task, ScheduleConfig::new(), Duration::ZERO);
        assert!(matches!(result, Err(SchedulerError::InvalidPeriod(_))));
    }

    #[tokio::test]
    async fn test_out_of_range_period_rejected() {
        let scheduler = TokioScheduler::new();
        let (task, _) = counting();
        let result = scheduler.add_periodic_job("x", task, ScheduleConfig::new(), Duration::MAX);
        assert!(matches!(result, Err(SchedulerError::InvalidPeriod(_))));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_fire_job_at_past_fires_once() {
        let scheduler = TokioScheduler::new();
        let (task, count) = counting();

        let name = scheduler
            .fire_job_at(None, task, ScheduleConfig::new(), Utc::now() - chrono::Duration::seconds(5))
            .unwrap();
        assert!(name.starts_with("once-"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(scheduler.schedule_of(&name).is_none());
    }

    #[tokio::test]
    async fn test_fire_job_at_cancelled_before_due() {
        let scheduler = TokioScheduler::new();
        let (task, count) = counting();

        scheduler
            .fire_job_at(
                Some("later"),
                task,
                ScheduleConfig::new(),
                Utc::now() + chrono::Duration::milliseconds(200),
            )
            .unwrap();
        scheduler.remove_job("later").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remove_unknown_job() {
        let scheduler = TokioScheduler::new();
        let result = scheduler.remove_job("missing");
        assert!(matches!(result, Err(SchedulerError::NoSuchJob(_))));
    }

    #[tokio::test]
    async fn test_invalid_cron_expression() {
        let scheduler = TokioScheduler::new();
        let (task, _) = counting();
        let result = scheduler.add_job("bad", task, ScheduleConfig::new(), "not a cron");
        assert!(matches!(result, Err(SchedulerError::InvalidExpression { .. })));
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_cron_job_fires() {
        let scheduler = TokioScheduler::new();
        let (task, count) = counting();

        scheduler
            .add_job("every-second", task, ScheduleConfig::new(), "* * * * * *")
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        assert!(count.load(Ordering::SeqCst) >= 1);
        assert_eq!(scheduler.job_names(), vec!["every-second".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_name_replaces_job() {
        let scheduler = TokioScheduler::new();
        let (first, first_count) = counting();
        let (second, second_count) = counting();

        scheduler
            .add_periodic_job("job", first, ScheduleConfig::new(), Duration::from_millis(100))
            .unwrap();
        scheduler
            .add_periodic_job("job", second, ScheduleConfig::new(), Duration::from_millis(100))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn test_register_without_runtime() {
        let scheduler = TokioScheduler::new();
        let (task, _) = counting();
        let result = scheduler.add_periodic_job("x", task, ScheduleConfig::new(), Duration::from_secs(1));
        assert!(matches!(result, Err(SchedulerError::Runtime(_))));
    }
