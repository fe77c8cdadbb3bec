//! Property tests for persisted role records.

use proptest::prelude::*;
use syndeo_config::{load, save, HostEnv, RoleConfig, REQUIRED_KEYS};
use tempfile::tempdir;

fn arb_config() -> impl Strategy<Value = RoleConfig> {
    (
        "[a-z_]{1,16}",
        "[a-z0-9_:-]{1,24}",
        1u32..128,
        1u32..64,
        "[a-z]{1,8}",
        prop_oneof![Just("n/a".to_string()), "gpu:[a-z]{2,6}:[1-8]"],
        "[0-9]-[0-9]{2}:[0-9]{2}:[0-9]{2}",
        "/[a-z]{1,8}",
        "[a-z/._]{0,20}",
    )
        .prop_map(
            |(job_name, output, cpus_per_task, nodes, partition, gres, time, tmpdir, src)| {
                RoleConfig {
                    job_name,
                    output,
                    cpus_per_task,
                    nodes,
                    partition,
                    gres,
                    time,
                    hostenv: HostEnv::BareMetal,
                    tmpdir,
                    container_src_path: src,
                    container_tgt_path: "/tmp/ray_container.sif".to_string(),
                }
            },
        )
}

proptest! {
    #[test]
    fn save_then_load_is_identity(config in arb_config()) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("role.json");

        save(&config, &path).unwrap();
        let loaded = RoleConfig::from_record(&load(&path).unwrap()).unwrap();

        prop_assert_eq!(loaded, config);
    }

    #[test]
    fn dropping_any_required_key_fails(config in arb_config(), idx in 0usize..REQUIRED_KEYS.len()) {
        let mut record = config.to_record().unwrap();
        record.remove(REQUIRED_KEYS[idx]);

        prop_assert!(RoleConfig::from_record(&record).is_err());
    }
}
