//! End-to-end runs against scripted backends.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::canary::{CanaryPhase, CanaryPolicy, TrafficShiftSchedule, TrafficStep};
    use crate::config::EngineConfig;
    use crate::core::{ActionStatus, PipelineStatus, StageStatus};
    use crate::errors::ExecutionErrorKind;
    use crate::health::AlarmRule;
    use crate::notifications::{EventKind, NotificationRule, Subscriber};
    use crate::pipeline::{ActionSpec, Pipeline, PipelineBuilder, StageSpec};
    use crate::ports::{DeploymentReceipt, ProvisioningStatus, SecretRef, SourceRepository, TestReport, TestStatus};
    use crate::testing::{
        assert_action_error, assert_action_status, assert_failed_at, assert_pipeline_succeeded, assert_stages_started,
        canary_pipeline, delivery_pipeline, EngineHarness,
    };
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn rule(name: &str, trigger: EventKind, address: &str) -> NotificationRule {
        NotificationRule::new(name, trigger).with_subscriber(Subscriber::email(address))
    }

    fn three_step_policy() -> CanaryPolicy {
        CanaryPolicy::new(
            "ServiceLambdaAliasServiceStackProd",
            TrafficShiftSchedule::new(vec![
                TrafficStep::new(10, Duration::from_secs(300)),
                TrafficStep::new(50, Duration::from_secs(300)),
                TrafficStep::new(100, Duration::from_secs(300)),
            ]),
        )
        .with_alarm(AlarmRule::server_errors("Prod"))
    }

    fn prod_receipt() -> DeploymentReceipt {
        DeploymentReceipt::new(ProvisioningStatus::Updated)
            .with_revision("2")
            .with_output("ServiceEndpoint", "https://api.example.com/prod/")
    }

    fn source_stage() -> StageSpec {
        StageSpec::new("Source").with_action(
            ActionSpec::source(
                "Fetch",
                SourceRepository::new("acme", "webapp", "main"),
                SecretRef::new("github-token"),
            )
            .with_output("Src"),
        )
    }

    fn build(name: &str, spec: &str, run_order: u32) -> ActionSpec {
        ActionSpec::build(name, "Src", spec).with_run_order(run_order)
    }

    fn pipeline(stages: Vec<StageSpec>) -> Pipeline {
        stages
            .into_iter()
            .try_fold(PipelineBuilder::new("props"), PipelineBuilder::stage)
            .unwrap()
            .build()
            .unwrap()
    }

    // Scenario: a failed test deployment halts the run before production.
    #[tokio::test(start_paused = true)]
    async fn test_failed_deploy_halts_pipeline() {
        let h = EngineHarness::new(vec![rule("deploys", EventKind::DeploymentFailed, "dev@example.com")]);
        h.mocks.provisioning.respond(
            "ServiceStackTest",
            DeploymentReceipt::new(ProvisioningStatus::Failed {
                reason: "CREATE_FAILED: bucket policy rejected".into(),
            }),
        );

        let outcome = h.run(&delivery_pipeline()).await;

        assert_failed_at(&outcome, "Deploy-Test", "ServiceUpdate");
        assert_stages_started(&outcome, &["Source", "Build", "PipelineUpdate", "Deploy-Test"]);
        assert_action_status(&outcome, "Deploy-Test", "IntegrationTests", ActionStatus::Pending);
        assert!(!h.mocks.provisioning.deployed().contains(&"ServiceStackProd".to_string()));
        assert!(h.mocks.tests.calls().is_empty());

        let sent = h.channel.sent_to("dev@example.com");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "[ServicePipeline] deployment_failed in Deploy-Test");
        assert!(sent[0].body.contains("CREATE_FAILED"));
    }

    // Scenario: a healthy canary is promoted step by step.
    #[tokio::test(start_paused = true)]
    async fn test_healthy_canary_promotes() {
        let h = EngineHarness::new(vec![rule("rollbacks", EventKind::CanaryRolledBack, "ops@example.com")]);
        h.mocks.provisioning.respond("ServiceStackProd", prod_receipt());
        h.mocks.metrics.set_constant("5XXError", 0.0);

        let outcome = h.run(&canary_pipeline(three_step_policy())).await;

        assert_pipeline_succeeded(&outcome);
        let report = outcome.action("Prod", "ServiceUpdate").unwrap().canary.clone().unwrap();
        assert_eq!(report.phase, CanaryPhase::Promoted);
        assert_eq!(report.traffic_percent, 100);
        assert_eq!(report.candidate_revision, "2");
        assert_eq!(h.mocks.traffic.weights(), vec![10, 50, 100]);
        assert_eq!(h.mocks.traffic.serving(), "2");
        assert!(h.channel.sent().is_empty());
    }

    // Scenario: errors during the first bake roll the canary back.
    #[tokio::test(start_paused = true)]
    async fn test_breaching_canary_rolls_back() {
        let h = EngineHarness::new(vec![
            rule("rollbacks", EventKind::CanaryRolledBack, "ops@example.com"),
            rule("deploys", EventKind::DeploymentFailed, "dev@example.com"),
            rule("runs", EventKind::PipelineFailed, "lead@example.com"),
        ]);
        h.mocks.provisioning.respond("ServiceStackProd", prod_receipt());
        h.mocks.metrics.set_constant("5XXError", 2.0);

        let outcome = h.run(&canary_pipeline(three_step_policy())).await;

        assert_failed_at(&outcome, "Prod", "ServiceUpdate");
        assert_action_error(&outcome, "Prod", "ServiceUpdate", ExecutionErrorKind::RolledBack);
        let failure = outcome.failure.clone().unwrap();
        assert_eq!(failure.alarm.as_deref(), Some("ServiceErrorAlarmProd"));
        assert_eq!(failure.traffic_percent, Some(10));

        let report = outcome.action("Prod", "ServiceUpdate").unwrap().canary.clone().unwrap();
        assert_eq!(report.phase, CanaryPhase::RolledBack);
        assert_eq!(report.traffic_percent, 0);
        assert_eq!(h.mocks.traffic.weights(), vec![10]);
        assert_eq!(h.mocks.traffic.resets(), vec!["1".to_string()]);
        assert_eq!(h.mocks.traffic.serving(), "1");

        let rollbacks = h.channel.sent_to("ops@example.com");
        assert_eq!(rollbacks.len(), 1);
        assert!(rollbacks[0].body.contains("ServiceErrorAlarmProd breached at 10% traffic"));
        assert_eq!(h.channel.sent_to("dev@example.com").len(), 1);
        assert_eq!(h.channel.sent_to("lead@example.com").len(), 1);
        assert_eq!(h.sink.events_of_type("canary.rolled_back").len(), 1);
    }

    // Scenario: failing tests after a good deployment fail the stage and
    // notify every subscriber with the execution link.
    #[tokio::test(start_paused = true)]
    async fn test_failed_integration_tests_notify_with_execution_url() {
        let rules = vec![NotificationRule::new("test-failures", EventKind::IntegrationTestFailed)
            .with_subscriber(Subscriber::email("dev@example.com"))
            .with_subscriber(Subscriber::sms("+15550100"))];
        let config = EngineConfig::new().with_console_url("https://console.example.com/pipelines/");
        let h = EngineHarness::with_config(rules, config);
        h.mocks.provisioning.respond(
            "ServiceStackTest",
            DeploymentReceipt::new(ProvisioningStatus::Updated).with_output("ServiceEndpoint", "https://api/test"),
        );
        h.mocks.tests.respond(TestReport {
            status: TestStatus::Failed,
            summary: "3 of 12 tests failed".into(),
        });

        let outcome = h.run(&delivery_pipeline()).await;

        let stage = outcome.stage("Deploy-Test").unwrap();
        assert_eq!(stage.status, StageStatus::Failed);
        assert!(stage.action("ServiceUpdate").unwrap().is_success());
        assert_failed_at(&outcome, "Deploy-Test", "IntegrationTests");

        let url = format!(
            "https://console.example.com/pipelines/ServicePipeline/executions/{}",
            outcome.run_id
        );
        for address in ["dev@example.com", "+15550100"] {
            let sent = h.channel.sent_to(address);
            assert_eq!(sent.len(), 1, "{address}");
            assert!(sent[0].body.contains(&url));
            assert!(sent[0].body.contains("3 of 12 tests failed"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_delivery_flows_artifacts_and_outputs() {
        let h = EngineHarness::new(Vec::new());
        h.mocks.provisioning.respond(
            "ServiceStackTest",
            DeploymentReceipt::new(ProvisioningStatus::Updated).with_output("ServiceEndpoint", "https://api/test"),
        );
        h.mocks.provisioning.respond("ServiceStackProd", prod_receipt());

        let outcome = h.run(&delivery_pipeline()).await;

        assert_pipeline_succeeded(&outcome);
        assert_eq!(
            h.mocks.provisioning.deployed(),
            vec!["ServicePipelineStack", "ServiceStackTest", "ServiceStackProd"]
        );

        let test_deploy = &h.mocks.provisioning.calls()[1];
        assert_eq!(test_deploy.template.file, "ServiceStackTest.template.json");
        assert!(test_deploy.template.location.key.starts_with("build/build_specs/cdk_build_specs"));
        assert!(test_deploy.parameters["ServiceLambdaCodeObjectKey"].starts_with("build/build_specs/service_build_specs"));
        assert_eq!(test_deploy.parameters["ServiceLambdaCodeBucketName"], "artifacts");

        assert_eq!(h.mocks.tests.calls()[0]["SERVICE_ENDPOINT"], "https://api/test");
        assert_eq!(h.sink.events_of_type("stage.started").len(), 5);
        assert_eq!(h.sink.events_of_type("stage.completed").len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_run_order_runs_concurrently() {
        let h = EngineHarness::new(Vec::new());
        h.mocks.build.set_delay(Duration::from_secs(10));
        let p = pipeline(vec![
            source_stage(),
            StageSpec::new("Build")
                .with_action(build("A", "a.yml", 1))
                .with_action(build("B", "b.yml", 1))
                .with_action(build("C", "c.yml", 1)),
        ]);

        let outcome = h.run(&p).await;

        assert_pipeline_succeeded(&outcome);
        assert_eq!(h.mocks.build.max_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_higher_run_order_waits_for_lower() {
        let h = EngineHarness::new(Vec::new());
        h.mocks.build.set_delay(Duration::from_secs(10));
        let p = pipeline(vec![
            source_stage(),
            StageSpec::new("Build")
                .with_action(build("Late", "late.yml", 2))
                .with_action(build("Early", "early.yml", 1)),
        ]);

        let outcome = h.run(&p).await;

        assert_pipeline_succeeded(&outcome);
        assert_eq!(
            h.mocks.build.timeline(),
            vec!["start:early.yml", "end:early.yml", "start:late.yml", "end:late.yml"]
        );
        // Outcomes keep definition order.
        let names: Vec<&str> = outcome.stage("Build").unwrap().actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(names, vec!["Late", "Early"]);
    }

    #[tokio::test]
    async fn test_failed_group_skips_later_groups_and_stages() {
        let h = EngineHarness::new(Vec::new());
        h.mocks.build.fail_spec("broken.yml", "linker error");
        let p = pipeline(vec![
            source_stage(),
            StageSpec::new("Build")
                .with_action(build("Broken", "broken.yml", 1))
                .with_action(build("Sibling", "sibling.yml", 1))
                .with_action(build("Later", "later.yml", 2)),
            StageSpec::new("Announce").with_action(ActionSpec::notify("Done", "shipped")),
        ]);

        let outcome = h.run(&p).await;

        assert_failed_at(&outcome, "Build", "Broken");
        assert_action_status(&outcome, "Build", "Sibling", ActionStatus::Succeeded);
        assert_action_status(&outcome, "Build", "Later", ActionStatus::Pending);
        assert_stages_started(&outcome, &["Source", "Build"]);
        assert!(!h.mocks.build.started().contains(&"later.yml".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_parallel_actions_caps_concurrency() {
        let h = EngineHarness::with_config(Vec::new(), EngineConfig::new().with_max_parallel_actions(1));
        h.mocks.build.set_delay(Duration::from_secs(5));
        let p = pipeline(vec![
            source_stage(),
            StageSpec::new("Build")
                .with_action(build("A", "a.yml", 1))
                .with_action(build("B", "b.yml", 1)),
        ]);

        let outcome = h.run(&p).await;

        assert_pipeline_succeeded(&outcome);
        assert_eq!(h.mocks.build.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_at_stage_boundary() {
        let h = EngineHarness::new(vec![rule("runs", EventKind::PipelineFailed, "lead@example.com")]);
        h.mocks.build.set_delay(Duration::from_secs(30));
        let p = pipeline(vec![
            source_stage(),
            StageSpec::new("Build").with_action(build("A", "a.yml", 1)),
            StageSpec::new("Announce").with_action(ActionSpec::notify("Done", "shipped")),
        ]);

        let cancel = Arc::new(CancellationToken::new());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            trigger.cancel("release freeze");
        });

        let outcome = h.engine.run_with_cancel(&p, cancel).await;

        assert_eq!(outcome.status, PipelineStatus::Cancelled);
        assert_stages_started(&outcome, &["Source", "Build"]);
        assert_action_status(&outcome, "Build", "A", ActionStatus::Succeeded);
        assert!(outcome.failure.is_none());
        assert!(h.channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_bake_rolls_back() {
        let h = EngineHarness::new(Vec::new());
        h.mocks.provisioning.respond("ServiceStackProd", prod_receipt());

        let cancel = Arc::new(CancellationToken::new());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(90)).await;
            trigger.cancel("operator abort");
        });

        let outcome = h.engine.run_with_cancel(&canary_pipeline(three_step_policy()), cancel).await;

        assert_failed_at(&outcome, "Prod", "ServiceUpdate");
        assert_action_error(&outcome, "Prod", "ServiceUpdate", ExecutionErrorKind::RolledBack);
        let failure = outcome.failure.unwrap();
        assert!(failure.alarm.is_none());
        assert!(failure.reason.contains("operator abort"));
        assert_eq!(h.mocks.traffic.resets(), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn test_backend_error_fails_like_reported_failure() {
        let h = EngineHarness::new(vec![rule("sources", EventKind::SourceFailed, "dev@example.com")]);
        h.mocks.source.fail_with("token revoked");

        let outcome = h.run(&pipeline(vec![source_stage()])).await;

        assert_failed_at(&outcome, "Source", "Fetch");
        assert_action_error(&outcome, "Source", "Fetch", ExecutionErrorKind::Backend);
        assert_eq!(h.mocks.source.fetched().len(), 1);
        assert_eq!(h.channel.sent_to("dev@example.com").len(), 1);
    }
}
