//! Unit tests for the BMCSettings reconciler

#[cfg(test)]
mod tests {
    use crate::conditions::{self, *};
    use crate::config::OperatorConfig;
    use crate::test_utils::*;
    use crds::*;
    use redfish_client::mock::DEFAULT_BMC_VERSION;
    use std::collections::BTreeMap;
    use std::time::Duration;

    const ADDRESS: &str = "10.0.0.1";

    async fn env_with_bmc(servers: &[&str]) -> TestEnv {
        let env = TestEnv::new();
        env.create_bmc("bmc-1", ADDRESS, &[]).await;
        for (i, server) in servers.iter().enumerate() {
            env.create_server(server, &format!("uuid-{i}"), "bmc-1", &[]).await;
        }
        env
    }

    fn bmc_settings(name: &str, settings: &[(&str, &str)]) -> BMCSettings {
        BMCSettings::new(
            name,
            BMCSettingsSpec {
                bmc_ref: Some(LocalObjectReference::new("bmc-1")),
                version: DEFAULT_BMC_VERSION.to_string(),
                settings: settings
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
                ..Default::default()
            },
        )
    }

    fn applied(settings: &BMCSettings) -> bool {
        settings.status.as_ref().and_then(|s| s.state) == Some(SettingsState::Applied)
    }

    #[tokio::test]
    async fn test_plain_attributes_skip_reset_and_maintenance() {
        let env = env_with_bmc(&["server-1"]).await;
        env.create(bmc_settings("bmcs", &[("abc", "baz")])).await;

        let settings = env.run_until::<BMCSettings, _>("bmcs", applied).await;
        let status = settings.status.unwrap();
        assert!(conditions::is_true(&status.conditions, SKIP_BMC_RESET));
        assert!(conditions::is_true(&status.conditions, ISSUE_SETTINGS_UPDATE));
        assert!(conditions::is_true(&status.conditions, VERIFY_BMC_SETTINGS));
        assert!(conditions::find(&status.conditions, BMC_RESET).is_none());
        assert!(status.last_applied_time.is_some());

        assert_eq!(env.redfish.bmc_attributes(ADDRESS)["abc"], "baz");
        assert_eq!(env.redfish.call_count("reset_manager"), 0);
        assert!(env.list::<ServerMaintenance>().await.is_empty());

        let bmc: BMC = env.get("bmc-1").await.unwrap();
        assert_eq!(bmc.spec.bmc_settings_ref, Some(LocalObjectReference::new("bmcs")));
    }

    #[tokio::test]
    async fn test_matching_attributes_apply_without_writes() {
        let env = env_with_bmc(&["server-1"]).await;
        env.create(bmc_settings("bmcs", &[("abc", "bar")])).await;

        let settings = env.run_until::<BMCSettings, _>("bmcs", applied).await;
        assert!(conditions::is_true(&settings.status.unwrap().conditions, VERIFY_BMC_SETTINGS));
        assert_eq!(env.redfish.call_count("set_bmc_attributes"), 0);
    }

    #[tokio::test]
    async fn test_reset_attributes_put_every_server_in_maintenance() {
        let env = env_with_bmc(&["server-1", "server-2"]).await;
        env.create(bmc_settings("bmcs", &[("fooreset", "2")])).await;

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..MAX_ROUNDS {
            env.reconcile_all().await;
            for maintenance in env.list::<ServerMaintenance>().await {
                seen.insert(maintenance.metadata.name.clone().unwrap_or_default());
            }
            if applied(&env.get::<BMCSettings>("bmcs").await.unwrap()) {
                break;
            }
        }
        assert_eq!(
            seen.into_iter().collect::<Vec<_>>(),
            vec!["bmcs-server-1".to_string(), "bmcs-server-2".to_string()]
        );

        let settings: BMCSettings = env.get("bmcs").await.unwrap();
        assert!(settings.spec.server_maintenance_refs.is_empty());
        let status = settings.status.unwrap();
        assert_eq!(status.state, Some(SettingsState::Applied));
        for tag in [SERVER_MAINTENANCE_CREATED, BMC_RESET, VERIFY_BMC_SETTINGS, SERVER_MAINTENANCE_DELETED] {
            assert!(conditions::is_true(&status.conditions, tag), "{tag} not recorded");
        }
        assert!(!conditions::is_true(&status.conditions, SKIP_BMC_RESET));

        assert_eq!(env.redfish.bmc_attributes(ADDRESS)["fooreset"], "2");
        assert_eq!(env.redfish.call_count("reset_manager"), 1);
        assert!(env.list::<ServerMaintenance>().await.is_empty());
        for name in ["server-1", "server-2"] {
            let server: Server = env.get(name).await.unwrap();
            assert_eq!(server.spec.maintenance_ref, None);
        }
    }

    #[tokio::test]
    async fn test_reset_without_servers_needs_no_maintenance() {
        let env = env_with_bmc(&[]).await;
        env.create(bmc_settings("bmcs", &[("fooreset", "2")])).await;

        let settings = env.run_until::<BMCSettings, _>("bmcs", applied).await;
        let status = settings.status.unwrap();
        assert!(conditions::is_true(&status.conditions, BMC_RESET));
        assert!(conditions::find(&status.conditions, SERVER_MAINTENANCE_CREATED).is_none());
        assert_eq!(env.redfish.bmc_attributes(ADDRESS)["fooreset"], "2");
    }

    #[tokio::test]
    async fn test_slow_manager_is_waited_for() {
        let env = env_with_bmc(&[]).await;
        env.redfish.set_reset_unreachable_calls(3);
        env.create(bmc_settings("bmcs", &[("fooreset", "5")])).await;

        env.run_until::<BMCSettings, _>("bmcs", applied).await;
        assert!(env.redfish.call_count("get_manager") >= 2);
        assert_eq!(env.redfish.bmc_attributes(ADDRESS)["fooreset"], "5");
    }

    #[tokio::test]
    async fn test_version_mismatch_waits() {
        let env = env_with_bmc(&[]).await;
        let mut settings = bmc_settings("bmcs", &[("abc", "baz")]);
        settings.spec.version = "2.0".to_string();
        env.create(settings).await;

        env.converge().await;
        let settings: BMCSettings = env.get("bmcs").await.unwrap();
        let status = settings.status.unwrap();
        assert_eq!(status.state, Some(SettingsState::Pending));
        assert_eq!(condition_types(&status.conditions), vec![PENDING_VERSION_UPDATE.to_string()]);
        assert_eq!(env.redfish.call_count("set_bmc_attributes"), 0);

        env.redfish.set_bmc_version(ADDRESS, "2.0");
        let settings = env.run_until::<BMCSettings, _>("bmcs", applied).await;
        let status = settings.status.unwrap();
        assert!(!conditions::is_true(&status.conditions, PENDING_VERSION_UPDATE));
        assert_eq!(env.redfish.bmc_attributes(ADDRESS)["abc"], "baz");
    }

    #[tokio::test]
    async fn test_drift_is_corrected() {
        let env = env_with_bmc(&[]).await;
        env.create(bmc_settings("bmcs", &[("abc", "baz")])).await;
        env.run_until::<BMCSettings, _>("bmcs", applied).await;

        env.redfish.set_bmc_attribute(ADDRESS, "abc", "drifted");
        env.reconcile_all().await;
        env.run_until::<BMCSettings, _>("bmcs", applied).await;
        assert_eq!(env.redfish.bmc_attributes(ADDRESS)["abc"], "baz");
        assert_eq!(env.redfish.call_count("set_bmc_attributes"), 2);
    }

    #[tokio::test]
    async fn test_second_settings_waits_for_bmc() {
        let env = env_with_bmc(&[]).await;
        env.create(bmc_settings("first", &[("abc", "baz")])).await;
        env.run_until::<BMCSettings, _>("first", applied).await;

        env.create(bmc_settings("second", &[("abc", "qux")])).await;
        env.converge().await;
        let second: BMCSettings = env.get("second").await.unwrap();
        assert!(!applied(&second));
        assert_eq!(env.redfish.bmc_attributes(ADDRESS)["abc"], "baz");

        env.objects::<BMCSettings>().delete("first").await.unwrap();
        env.run_until::<BMCSettings, _>("second", applied).await;
        assert_eq!(env.redfish.bmc_attributes(ADDRESS)["abc"], "qux");
        let bmc: BMC = env.get("bmc-1").await.unwrap();
        assert_eq!(bmc.spec.bmc_settings_ref, Some(LocalObjectReference::new("second")));
    }

    #[tokio::test]
    async fn test_delete_releases_bmc() {
        let env = env_with_bmc(&[]).await;
        env.create(bmc_settings("bmcs", &[("abc", "baz")])).await;
        env.run_until::<BMCSettings, _>("bmcs", applied).await;

        env.objects::<BMCSettings>().delete("bmcs").await.unwrap();
        env.converge().await;
        assert!(env.get::<BMCSettings>("bmcs").await.is_none());
        let bmc: BMC = env.get("bmc-1").await.unwrap();
        assert_eq!(bmc.spec.bmc_settings_ref, None);
    }

    #[tokio::test]
    async fn test_manager_lost_past_grace_fails() {
        let env = TestEnv::with_config(OperatorConfig {
            bmc_reset_grace: Duration::ZERO,
            ..test_config()
        });
        env.create_bmc("bmc-1", ADDRESS, &[]).await;
        env.redfish.set_reset_unreachable_calls(1000);
        env.create(bmc_settings("bmcs", &[("fooreset", "2")])).await;

        let settings = env
            .run_until::<BMCSettings, _>("bmcs", |s| {
                s.status.as_ref().and_then(|s| s.state) == Some(SettingsState::Failed)
            })
            .await;
        let status = settings.status.unwrap();
        assert!(conditions::is_true(&status.conditions, REMOTE_OPERATION_FAILED));
        let reset = conditions::find(&status.conditions, BMC_RESET).unwrap();
        assert!(!reset.is_true());
        assert_eq!(env.redfish.call_count("reset_manager"), 1);
    }

    #[tokio::test]
    async fn test_manager_within_grace_keeps_waiting() {
        let env = env_with_bmc(&[]).await;
        env.redfish.set_reset_unreachable_calls(1000);
        env.create(bmc_settings("bmcs", &[("fooreset", "2")])).await;

        for _ in 0..10 {
            env.reconcile_all().await;
        }
        let settings: BMCSettings = env.get("bmcs").await.unwrap();
        let status = settings.status.unwrap();
        assert_eq!(status.state, Some(SettingsState::InProgress));
        assert!(!conditions::find(&status.conditions, BMC_RESET).unwrap().is_true());
        assert!(conditions::find(&status.conditions, REMOTE_OPERATION_FAILED).is_none());
        assert_eq!(env.redfish.call_count("reset_manager"), 1);
        assert!(env.redfish.call_count("get_manager") >= 2);
    }
}
