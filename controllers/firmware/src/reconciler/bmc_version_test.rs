//! Unit tests for the BMCVersion reconciler

#[cfg(test)]
mod tests {
    use crate::annotations::{OPERATION_ANNOTATION, OPERATION_RETRY};
    use crate::conditions::{self, *};
    use crate::test_utils::*;
    use crds::*;
    use redfish_client::mock::DEFAULT_BMC_VERSION;
    use serde_json::json;

    const ADDRESS: &str = "10.0.0.1";
    const IMAGE: &str = "http://images.local/bmc-2.0.bin";

    async fn env_with_bmc(servers: &[&str]) -> TestEnv {
        let env = TestEnv::new();
        env.create_bmc("bmc-1", ADDRESS, &[]).await;
        for (i, server) in servers.iter().enumerate() {
            env.create_server(server, &format!("uuid-{i}"), "bmc-1", &[]).await;
        }
        env.redfish.add_firmware_image(IMAGE, "2.0");
        env
    }

    fn bmc_version(name: &str, version: &str) -> BMCVersion {
        BMCVersion::new(
            name,
            BMCVersionSpec {
                bmc_ref: Some(LocalObjectReference::new("bmc-1")),
                version: version.to_string(),
                image: ImageSpec {
                    uri: IMAGE.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
    }

    fn completed(version: &BMCVersion) -> bool {
        version.state() == Some(VersionState::Completed)
    }

    #[tokio::test]
    async fn test_current_version_completes_immediately() {
        let env = env_with_bmc(&["server-1"]).await;
        env.create(bmc_version("bmcv", DEFAULT_BMC_VERSION)).await;

        let version = env.run_until::<BMCVersion, _>("bmcv", completed).await;
        assert!(version.status.unwrap().conditions.is_empty());
        assert_eq!(env.redfish.call_count("upgrade_bmc"), 0);
        assert!(env.list::<ServerMaintenance>().await.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_holds_every_server_and_resets_manager() {
        let env = env_with_bmc(&["server-1", "server-2"]).await;
        env.create(bmc_version("bmcv", "2.0")).await;

        let mut most_held = 0;
        for _ in 0..MAX_ROUNDS {
            env.reconcile_all().await;
            most_held = most_held.max(env.list::<ServerMaintenance>().await.len());
            if completed(&env.get::<BMCVersion>("bmcv").await.unwrap()) {
                break;
            }
        }
        assert_eq!(most_held, 2);

        let version: BMCVersion = env.get("bmcv").await.unwrap();
        assert!(version.spec.server_maintenance_refs.is_empty());
        let status = version.status.unwrap();
        assert_eq!(status.state, Some(VersionState::Completed));
        for tag in [
            SERVER_MAINTENANCE_CREATED,
            BMC_UPGRADE_ISSUED,
            BMC_UPGRADE_COMPLETED,
            BMC_RESET,
            BMC_UPGRADE_VERIFICATION,
            SERVER_MAINTENANCE_DELETED,
        ] {
            assert!(conditions::is_true(&status.conditions, tag), "{tag} not recorded");
        }
        assert_eq!(status.upgrade_task.unwrap().state, Some(UpgradeTaskState::Completed));

        assert_eq!(env.redfish.bmc_version(ADDRESS), "2.0");
        assert_eq!(env.redfish.call_count("reset_manager"), 1);
        assert!(env.list::<ServerMaintenance>().await.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_without_servers() {
        let env = env_with_bmc(&[]).await;
        env.create(bmc_version("bmcv", "2.0")).await;

        let version = env.run_until::<BMCVersion, _>("bmcv", completed).await;
        let status = version.status.unwrap();
        assert!(conditions::find(&status.conditions, SERVER_MAINTENANCE_CREATED).is_none());
        assert!(conditions::is_true(&status.conditions, BMC_UPGRADE_VERIFICATION));
        assert_eq!(env.redfish.bmc_version(ADDRESS), "2.0");
    }

    #[tokio::test]
    async fn test_unknown_image_fails() {
        let env = env_with_bmc(&[]).await;
        let mut version = bmc_version("bmcv", "2.0");
        version.spec.image.uri = "http://images.local/missing.bin".to_string();
        env.create(version).await;

        let version = env
            .run_until::<BMCVersion, _>("bmcv", |v| v.state() == Some(VersionState::Failed))
            .await;
        assert!(conditions::is_true(&version.status.unwrap().conditions, REMOTE_OPERATION_FAILED));
        assert_eq!(env.redfish.bmc_version(ADDRESS), DEFAULT_BMC_VERSION);
    }

    #[tokio::test]
    async fn test_failed_task_retried_on_request() {
        let env = env_with_bmc(&["server-1"]).await;
        env.create(bmc_version("bmcv", "2.0")).await;
        env.redfish.fail_next_task();

        let failed = env
            .run_until::<BMCVersion, _>("bmcv", |v| v.state() == Some(VersionState::Failed))
            .await;
        let status = failed.status.unwrap();
        assert!(conditions::is_true(&status.conditions, REMOTE_OPERATION_FAILED));
        assert!(!conditions::is_true(&status.conditions, BMC_UPGRADE_COMPLETED));
        assert_eq!(env.list::<ServerMaintenance>().await.len(), 1);

        env.annotate::<BMCVersion>("bmcv", OPERATION_ANNOTATION, OPERATION_RETRY).await;
        let version = env.run_until::<BMCVersion, _>("bmcv", completed).await;
        let status = version.status.unwrap();
        assert!(!conditions::is_true(&status.conditions, REMOTE_OPERATION_FAILED));
        assert_eq!(env.redfish.call_count("upgrade_bmc"), 2);
        assert_eq!(env.redfish.bmc_version(ADDRESS), "2.0");
        assert!(env.list::<ServerMaintenance>().await.is_empty());

        let cleared: BMCVersion = env.get("bmcv").await.unwrap();
        let annotations = cleared.metadata.annotations.unwrap_or_default();
        assert!(!annotations.contains_key(OPERATION_ANNOTATION));
    }

    #[tokio::test]
    async fn test_downgrade_restarts_completed_version() {
        let env = env_with_bmc(&[]).await;
        env.create(bmc_version("bmcv", "2.0")).await;
        env.run_until::<BMCVersion, _>("bmcv", completed).await;

        env.redfish.set_bmc_version(ADDRESS, DEFAULT_BMC_VERSION);
        env.reconcile_all().await;
        let restarted: BMCVersion = env.get("bmcv").await.unwrap();
        assert_ne!(restarted.state(), Some(VersionState::Completed));

        env.run_until::<BMCVersion, _>("bmcv", completed).await;
        assert_eq!(env.redfish.call_count("upgrade_bmc"), 2);
        assert_eq!(env.redfish.bmc_version(ADDRESS), "2.0");
    }

    #[tokio::test]
    async fn test_delete_releases_maintenances() {
        let env = env_with_bmc(&["server-1"]).await;
        env.redfish.set_task_polls(100);
        env.create(bmc_version("bmcv", "2.0")).await;
        for _ in 0..6 {
            env.reconcile_all().await;
        }
        assert_eq!(env.list::<ServerMaintenance>().await.len(), 1);

        env.objects::<BMCVersion>().delete("bmcv").await.unwrap();
        env.converge().await;
        assert!(env.get::<BMCVersion>("bmcv").await.is_none());
        assert!(env.list::<ServerMaintenance>().await.is_empty());
        let server: Server = env.get("server-1").await.unwrap();
        assert_eq!(server.spec.maintenance_ref, None);
    }

    #[tokio::test]
    async fn test_withdrawn_maintenances_return_to_pending() {
        let env = env_with_bmc(&["server-1"]).await;
        env.redfish.set_task_polls(100);
        env.create(bmc_version("bmcv", "2.0")).await;
        env.run_until::<BMCVersion, _>("bmcv", |v| {
            conditions::is_true(&v.status.clone().unwrap_or_default().conditions, BMC_UPGRADE_ISSUED)
        })
        .await;
        assert!(env.maintenance("bmcv-server-1").await.is_some());

        env.objects::<BMCVersion>()
            .patch("bmcv", &json!({ "spec": { "serverMaintenanceRefs": [] } }))
            .await
            .unwrap();
        let version: BMCVersion = env.get("bmcv").await.unwrap();
        env.reconciler.reconcile_bmc_version(&version).await.unwrap();

        let maintenance = env.maintenance("bmcv-server-1").await.unwrap();
        assert!(maintenance.metadata.deletion_timestamp.is_some());
        let version: BMCVersion = env.get("bmcv").await.unwrap();
        assert_eq!(version.state(), Some(VersionState::Pending));
        let status = version.status.unwrap();
        assert!(conditions::find(&status.conditions, SERVER_MAINTENANCE_CREATED).is_none());
    }
}
