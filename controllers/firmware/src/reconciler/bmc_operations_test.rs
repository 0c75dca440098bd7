//! Unit tests for operator requests on BMCs

#[cfg(test)]
mod tests {
    use crate::annotations::{OPERATION_ANNOTATION, OPERATION_FORCE_RESET, OPERATION_IGNORE};
    use crate::test_utils::*;
    use crds::*;

    #[tokio::test]
    async fn test_force_reset_resets_once_and_clears_annotation() {
        let env = TestEnv::new();
        env.create_bmc("bmc-1", "10.0.0.1", &[]).await;
        env.annotate::<BMC>("bmc-1", OPERATION_ANNOTATION, OPERATION_FORCE_RESET).await;

        env.converge().await;
        assert_eq!(env.redfish.call_count("reset_manager"), 1);
        let bmc: BMC = env.get("bmc-1").await.unwrap();
        let annotations = bmc.metadata.annotations.unwrap_or_default();
        assert!(!annotations.contains_key(OPERATION_ANNOTATION));
    }

    #[tokio::test]
    async fn test_unannotated_bmc_is_not_touched() {
        let env = TestEnv::new();
        env.create_bmc("bmc-1", "10.0.0.1", &[]).await;
        env.annotate::<BMC>("bmc-1", OPERATION_ANNOTATION, OPERATION_IGNORE).await;

        env.converge().await;
        assert!(env.redfish.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_request() {
        let env = TestEnv::new();
        env.create_bmc("bmc-1", "10.0.0.1", &[]).await;
        env.annotate::<BMC>("bmc-1", OPERATION_ANNOTATION, OPERATION_FORCE_RESET).await;
        env.redfish.fail_once("reset_manager", redfish_client::mock::MockFailure::Transient);

        let errors = env.reconcile_all().await;
        assert_eq!(errors.len(), 1, "{errors:?}");
        let bmc: BMC = env.get("bmc-1").await.unwrap();
        assert_eq!(
            bmc.metadata.annotations.unwrap_or_default()[OPERATION_ANNOTATION],
            OPERATION_FORCE_RESET
        );

        env.converge().await;
        assert_eq!(env.redfish.call_count("reset_manager"), 2);
    }
}
