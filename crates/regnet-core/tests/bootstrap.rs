//! End-to-end bootstrap runs against the in-memory engine.

use async_trait::async_trait;
use regnet_core::{
    BootstrapState, BuildRequest, ChainSettings, CommandRunner, CoreError, EnvironmentConfig,
    FundingPlan, Orchestrator, Phase, Result, Timings, Topology, WalletDescriptor, WalletKind,
};
use regnet_engine::{EngineCall, LifecycleManager, MockEngine};
use std::io::Read;
use std::net::{Ipv4Addr, TcpListener};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const PREFIX: &str = "regnet-localenv-";
const ACTIVATOR: &str = "regnet-localenv-activator";

/// One command seen by [`ScriptedRunner`].
#[derive(Debug, Clone)]
struct RunnerCall {
    sandbox: String,
    exe: String,
    args: String,
    /// Engine calls made before this command ran.
    engine_calls: usize,
}

/// Answers chain commands the way a healthy node would.
#[derive(Default)]
struct ScriptedRunner {
    engine: Arc<MockEngine>,
    calls: Mutex<Vec<RunnerCall>>,
    /// Argument prefixes that fail.
    failing: Mutex<Vec<String>>,
    /// Override for the collateral output listing.
    outputs: Mutex<Option<String>>,
    /// When set, readiness probes never succeed.
    never_ready: Mutex<bool>,
}

impl ScriptedRunner {
    fn new(engine: Arc<MockEngine>) -> Self {
        Self {
            engine,
            ..Self::default()
        }
    }

    fn fail_on(&self, prefix: &str) {
        self.failing.lock().unwrap().push(prefix.to_owned());
    }

    fn calls(&self) -> Vec<RunnerCall> {
        self.calls.lock().unwrap().clone()
    }

    fn ran(&self, args: &str) -> bool {
        self.calls().iter().any(|c| c.args.starts_with(args))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, sandbox: &str, exe: &str, args: &str) -> Result<String> {
        let engine_calls = self.engine.calls().len();
        self.calls.lock().unwrap().push(RunnerCall {
            sandbox: sandbox.to_owned(),
            exe: exe.to_owned(),
            args: args.to_owned(),
            engine_calls,
        });

        let failing = self.failing.lock().unwrap().iter().any(|p| args.starts_with(p));
        let not_ready = args == "getinfo" && *self.never_ready.lock().unwrap();
        if failing || not_ready {
            return Err(CoreError::Command {
                sandbox: sandbox.into(),
                exe: exe.into(),
                args: args.into(),
                message: "exit status 1".into(),
            });
        }

        let output = match args {
            "servicenode genkey" => format!("key-{sandbox}\n"),
            "servicenode outputs" => self.outputs.lock().unwrap().clone().unwrap_or_else(|| {
                r#"[{"txhash":"tx-a","outputidx":0},{"txhash":"tx-b","outputidx":1}]"#.into()
            }),
            _ => "{}\n".into(),
        };
        Ok(output)
    }
}

struct Harness {
    engine: Arc<MockEngine>,
    runner: Arc<ScriptedRunner>,
    orchestrator: Orchestrator,
    config_path: PathBuf,
}

fn harness() -> Harness {
    harness_with_wallets(vec![])
}

fn harness_with_wallets(wallets: Vec<WalletDescriptor>) -> Harness {
    let engine = Arc::new(MockEngine::new());
    let runner = Arc::new(ScriptedRunner::new(engine.clone()));
    let chain = ChainSettings::default();
    let config_path = std::env::temp_dir().join(format!("regnet-test-{}", uuid::Uuid::new_v4()));

    let topology = Topology::default_localenv(PREFIX, Ipv4Addr::LOCALHOST, &chain, wallets).unwrap();
    let config = EnvironmentConfig::builder()
        .config_path(&config_path)
        .prefix(PREFIX)
        .topology(topology)
        .chain(chain)
        .funding(FundingPlan::default())
        .timings(Timings {
            readiness_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            stop_grace: Duration::from_secs(1),
            activation_settle: Duration::from_millis(1),
            restart_settle: Duration::from_millis(1),
            fan_out_deadline: Duration::from_secs(5),
        })
        .build()
        .unwrap();

    let lifecycle = LifecycleManager::new(engine.clone());
    let orchestrator = Orchestrator::new(config, lifecycle, runner.clone());
    Harness {
        engine,
        runner,
        orchestrator,
        config_path,
    }
}

/// Files in an uploaded archive, as (path, contents).
fn unpack(archive: &[u8]) -> Vec<(String, String)> {
    let mut files = Vec::new();
    let mut archive = tar::Archive::new(archive);
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path = entry.path().unwrap().display().to_string();
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        files.push((path, contents));
    }
    files
}

fn position(calls: &[EngineCall], call: &EngineCall) -> usize {
    calls
        .iter()
        .position(|c| c == call)
        .unwrap_or_else(|| panic!("{call:?} not found in {calls:?}"))
}

#[tokio::test]
async fn test_bootstrap_reaches_ready() {
    let h = harness();
    let cancel = CancellationToken::new();

    h.orchestrator.start(None, &cancel).await.unwrap();
    assert_eq!(h.orchestrator.state(), BootstrapState::Ready);

    let mut names = h.engine.names();
    names.sort();
    assert_eq!(
        names,
        vec![ACTIVATOR, "regnet-localenv-sn1", "regnet-localenv-sn2"]
    );

    // Activator: registry + chain conf. Service nodes: chain conf, registry, bridge conf.
    let uploads = h.engine.uploads();
    assert_eq!(uploads.len(), 8);

    let summary = std::fs::read_to_string(h.config_path.join("blocknetdx.conf")).unwrap();
    assert_eq!(summary.matches("connect=").count(), 3);
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_registry_pairs_nodes_keys_and_outputs() {
    let h = harness();
    h.orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap();

    let registries: Vec<String> = h
        .engine
        .uploads()
        .iter()
        .flat_map(|(_, _, archive)| unpack(archive))
        .filter(|(path, _)| path == "servicenode.conf")
        .map(|(_, contents)| contents)
        .collect();

    assert_eq!(registries.len(), 3);
    for registry in &registries {
        assert_eq!(
            registry,
            "sn1 127.0.0.1:41478 key-regnet-localenv-sn1 tx-a 0\n\
             sn2 127.0.0.1:41479 key-regnet-localenv-sn2 tx-b 1\n"
        );
    }
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_service_node_conf_carries_its_key() {
    let h = harness();
    h.orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap();

    let sn1_conf = h
        .engine
        .uploads()
        .into_iter()
        .filter(|(id, dest, _)| id == "regnet-localenv-sn1" && dest == "/opt/blockchain/config/")
        .flat_map(|(_, _, archive)| unpack(&archive))
        .map(|(_, contents)| contents)
        .next()
        .unwrap();

    assert!(sn1_conf.contains("servicenode=1"));
    assert!(sn1_conf.contains("servicenodeprivkey=key-regnet-localenv-sn1"));
    assert!(!sn1_conf.contains("connect=127.0.0.1:41478"));
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_restart_order() {
    let h = harness();
    h.orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap();

    let mutations = h.engine.mutations();
    let stop_activator = position(&mutations, &EngineCall::Stop(ACTIVATOR.into()));
    let restart_sn1 = position(&mutations, &EngineCall::Restart("regnet-localenv-sn1".into()));
    let restart_sn2 = position(&mutations, &EngineCall::Restart("regnet-localenv-sn2".into()));
    let restart_activator = position(&mutations, &EngineCall::Restart(ACTIVATOR.into()));

    assert!(stop_activator < restart_sn1);
    assert!(stop_activator < restart_sn2);
    assert!(restart_sn1 < restart_activator);
    assert!(restart_sn2 < restart_activator);

    // Activation restarts the activator once more, service nodes are left alone.
    let activator_restarts = mutations
        .iter()
        .filter(|c| **c == EngineCall::Restart(ACTIVATOR.into()))
        .count();
    assert_eq!(activator_restarts, 2);
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_fragmentation_failure_halts_bootstrap() {
    let h = harness();
    h.runner.fail_on("sendtoaddress y5zBd8oLQSnTjChTUCfRieTAp5Z31bRwEV");

    let err = h
        .orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::InputFragmentation));
    assert_eq!(h.orchestrator.state(), BootstrapState::Failed);
    assert!(!h.runner.ran("servicenode genkey"));
    assert!(h.engine.uploads().is_empty());

    // Sandboxes stay up for inspection.
    assert_eq!(h.engine.names().len(), 3);
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_output_count_mismatch_fails_discovery() {
    let h = harness();
    *h.runner.outputs.lock().unwrap() = Some(r#"[{"txhash":"tx-a","outputidx":0}]"#.into());

    let err = h
        .orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::CollateralDiscovery));
    match err {
        CoreError::Phase { source, .. } => assert!(matches!(*source, CoreError::Parse(_))),
        other => panic!("unexpected error: {other}"),
    }
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_readiness_timeout_fails_before_bootstrap() {
    let h = harness();
    *h.runner.never_ready.lock().unwrap() = true;

    let err = h
        .orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::Timeout(_)));
    assert!(!h.runner.ran("importprivkey"));
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_cancel_before_start_does_nothing() {
    let h = harness();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h.orchestrator.start(None, &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(h.engine.mutations().is_empty());
    assert!(h.runner.calls().is_empty());
}

#[tokio::test]
async fn test_cancel_during_readiness_starts_nothing_new() {
    let h = harness();
    *h.runner.never_ready.lock().unwrap() = true;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = h.orchestrator.start(None, &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(!h.runner.ran("importprivkey"));
    assert!(h.engine.uploads().is_empty());
    // No automatic teardown.
    assert_eq!(h.engine.names().len(), 3);
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_stale_sandboxes_are_replaced() {
    let h = harness();
    h.engine.insert("regnet-localenv-sn1", true, true);

    h.orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap();

    let mutations = h.engine.mutations();
    let resume = position(&mutations, &EngineCall::Resume("regnet-localenv-sn1".into()));
    let create = mutations
        .iter()
        .position(|c| matches!(c, EngineCall::Create { name, .. } if name == "regnet-localenv-sn1"))
        .unwrap();
    assert!(resume < create);
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_build_runs_first() {
    let h = harness();
    h.engine
        .set_build_output(vec!["Step 1/9 : FROM ubuntu:16.04".into()]);

    let build = BuildRequest {
        context: bytes::Bytes::new(),
        dockerfile: "Dockerfile".into(),
        tag: "regnet/chain:localenv".into(),
    };
    h.orchestrator
        .start(Some(build), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        h.engine.calls().first(),
        Some(&EngineCall::BuildImage {
            tag: "regnet/chain:localenv".into()
        })
    );
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_stop_removes_only_environment() {
    let h = harness();
    h.engine.insert("unrelated", true, false);
    h.orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap();

    h.orchestrator.stop().await.unwrap();

    assert_eq!(h.engine.names(), vec!["unrelated"]);
    assert_eq!(h.orchestrator.state(), BootstrapState::Stopped);
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_stop_without_environment_is_noop() {
    let h = harness();

    h.orchestrator.stop().await.unwrap();

    assert!(h.engine.mutations().is_empty());
}

/// A sandboxed SYS wallet and a bring-your-own LTC wallet listening on `rpc_port`.
fn wallets(rpc_port: u16) -> Vec<WalletDescriptor> {
    let sys = WalletDescriptor::new(WalletKind::Sys, "sys-addr", Ipv4Addr::LOCALHOST, "sysuser", "syspass");
    let mut ltc = WalletDescriptor::new(WalletKind::Ltc, "ltc-addr", Ipv4Addr::LOCALHOST, "ltcuser", "ltcpass");
    ltc.bring_own = true;
    ltc.rpc_port = rpc_port;
    vec![sys, ltc]
}

#[tokio::test]
async fn test_bootstrap_with_wallets() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let rpc_port = listener.local_addr().unwrap().port();
    let h = harness_with_wallets(wallets(rpc_port));

    h.orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(h.orchestrator.state(), BootstrapState::Ready);

    // Only the sandboxed wallet gets a sandbox, from its own image.
    let mut names = h.engine.names();
    names.sort();
    assert_eq!(
        names,
        vec![
            "regnet-localenv-SYS",
            ACTIVATOR,
            "regnet-localenv-sn1",
            "regnet-localenv-sn2",
        ]
    );
    assert!(h.engine.calls().iter().any(|c| matches!(
        c,
        EngineCall::Create { name, image }
            if name == "regnet-localenv-SYS" && image == "blocknetdx/syscoin2:2.1.6-snap500644"
    )));

    // Probed through its own CLI.
    let sys_probes: Vec<RunnerCall> = h
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.sandbox == "regnet-localenv-SYS")
        .collect();
    assert!(!sys_probes.is_empty());
    assert!(sys_probes
        .iter()
        .all(|c| c.exe == "syscoin-cli" && c.args == "getinfo"));
    assert!(!h.runner.calls().iter().any(|c| c.sandbox.contains("LTC")));

    // Every service node gets a bridge config listing both wallets.
    let bridges: Vec<(String, String)> = h
        .engine
        .uploads()
        .into_iter()
        .filter(|(_, dest, _)| dest == "/opt/blockchain/regnet/")
        .flat_map(|(id, _, archive)| unpack(&archive).into_iter().map(move |(_, c)| (id.clone(), c)))
        .collect();
    let targets: Vec<&str> = bridges.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(targets, vec!["regnet-localenv-sn1", "regnet-localenv-sn2"]);
    for (_, bridge) in &bridges {
        assert!(bridge.contains("ExchangeWallets=SYS,LTC\n"));
        assert!(bridge.contains("[SYS]\n"));
        assert!(bridge.contains("[LTC]\n"));
        assert!(bridge.contains(&format!("Port={rpc_port}\n")));
        assert!(bridge.contains("Username=ltcuser\n"));
    }

    h.orchestrator.stop().await.unwrap();
    assert!(h.engine.names().is_empty());
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_unreachable_external_wallet_fails_restart_readiness() {
    // Reserve a port, then close it so connections are refused.
    let rpc_port = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let h = harness_with_wallets(wallets(rpc_port));

    let err = h
        .orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap_err();

    // The first readiness wait covers chain nodes only; the post-restart
    // wait includes external wallets.
    assert_eq!(err.phase(), Some(Phase::ControlledRestart));
    match err {
        CoreError::Phase { source, .. } => assert!(matches!(*source, CoreError::Timeout(_))),
        other => panic!("unexpected error: {other}"),
    }
    assert!(!h.runner.ran("servicenode start-all"));
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_activation_starts_service_nodes_around_activator_restart() {
    let h = harness();
    h.orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap();

    let start_all: Vec<RunnerCall> = h
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.args == "servicenode start-all")
        .collect();
    assert_eq!(start_all.len(), 2);
    assert!(start_all.iter().all(|c| c.sandbox == ACTIVATOR));

    let calls = h.engine.calls();
    let last_restart = calls
        .iter()
        .rposition(|c| *c == EngineCall::Restart(ACTIVATOR.into()))
        .unwrap();
    assert!(start_all[0].engine_calls <= last_restart);
    assert!(last_restart < start_all[1].engine_calls);
    std::fs::remove_dir_all(&h.config_path).ok();
}

#[tokio::test]
async fn test_activator_missing_at_restart_fails() {
    let h = harness();
    h.engine.remove_on_stop(ACTIVATOR);

    let err = h
        .orchestrator
        .start(None, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.phase(), Some(Phase::ControlledRestart));
    assert_eq!(h.orchestrator.state(), BootstrapState::Failed);
    assert!(!h
        .engine
        .mutations()
        .contains(&EngineCall::Restart(ACTIVATOR.into())));
    assert!(!h.runner.ran("servicenode start-all"));
    std::fs::remove_dir_all(&h.config_path).ok();
}
