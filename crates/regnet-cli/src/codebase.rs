//! Preparing a chain codebase for an image build.
//!
//! `up` checks the tree, applies the genesis patch and writes a Dockerfile
//! into it. `down` undoes both.

use bytes::Bytes;
use regnet_core::ChainSettings;
use regnet_engine::{BuildContext, EngineError};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Name of the Dockerfile written into the codebase.
pub const DOCKERFILE_NAME: &str = "Dockerfile-regnet";

/// Path of the wallet payload inside the build context.
pub const WALLET_DATA_NAME: &str = "wallet.dat";

/// Path of the default chain configuration inside the build context.
const DEFAULT_CONF_NAME: &str = "regnet/default.conf";

/// Errors from codebase preparation.
#[derive(Debug, thiserror::Error)]
pub enum CodebaseError {
    #[error("invalid codebase directory: {0}")]
    Missing(PathBuf),

    #[error("{cli} missing from {path}, did you build first?")]
    CliMissing { cli: String, path: PathBuf },

    #[error("genesis patch {patch}: {message}")]
    Patch { patch: PathBuf, message: String },

    #[error("build context: {0}")]
    Context(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CodebaseError>;

/// A chain source tree on the host.
#[derive(Debug, Clone)]
pub struct Codebase {
    root: PathBuf,
}

impl Codebase {
    /// Open an existing codebase directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(CodebaseError::Missing(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Check that the chain CLI has been built (`src/<cli>`).
    pub fn check_cli(&self, cli: &str) -> Result<()> {
        let path = self.root.join("src").join(cli);
        if !path.is_file() {
            return Err(CodebaseError::CliMissing {
                cli: cli.to_owned(),
                path,
            });
        }
        Ok(())
    }

    pub fn dockerfile_path(&self) -> PathBuf {
        self.root.join(DOCKERFILE_NAME)
    }

    /// Apply `patch` with `git apply`.
    ///
    /// If the patch does not apply cleanly it is first reverted, so a tree
    /// left patched by an earlier run is patched exactly once.
    pub async fn apply_patch(&self, patch: &Path) -> Result<()> {
        let patch_arg = patch.to_string_lossy();

        if !self.git(&["apply", "--check", &patch_arg]).await?.0 {
            tracing::debug!(patch = %patch.display(), "Patch does not apply cleanly, reverting first");
            let (reverted, output) = self.git(&["apply", "-R", &patch_arg]).await?;
            if !reverted {
                return Err(CodebaseError::Patch {
                    patch: patch.to_owned(),
                    message: format!("reverting failed, check codebase: git apply -R ({output})"),
                });
            }
        }

        let (applied, output) = self.git(&["apply", &patch_arg]).await?;
        if !applied {
            return Err(CodebaseError::Patch {
                patch: patch.to_owned(),
                message: format!("possible conflict: {output}"),
            });
        }

        tracing::info!(patch = %patch.display(), "Genesis patch applied");
        Ok(())
    }

    /// Revert `patch`. A tree that does not carry it is left alone.
    pub async fn revert_patch(&self, patch: &Path) -> Result<()> {
        let patch_arg = patch.to_string_lossy();

        if !self.git(&["apply", "-R", "--check", &patch_arg]).await?.0 {
            tracing::debug!(patch = %patch.display(), "Patch not applied, nothing to revert");
            return Ok(());
        }

        let (reverted, output) = self.git(&["apply", "-R", &patch_arg]).await?;
        if !reverted {
            return Err(CodebaseError::Patch {
                patch: patch.to_owned(),
                message: format!("failed to remove: {output}"),
            });
        }

        tracing::info!(patch = %patch.display(), "Genesis patch removed");
        Ok(())
    }

    pub async fn write_dockerfile(&self, contents: &str) -> Result<()> {
        tokio::fs::write(self.dockerfile_path(), contents).await?;
        Ok(())
    }

    /// Remove the Dockerfile; a missing file is not an error.
    pub async fn remove_dockerfile(&self) -> Result<()> {
        match tokio::fs::remove_file(self.dockerfile_path()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Archive the tree with the rendered Dockerfile, the default chain
    /// configuration and an optional wallet payload.
    ///
    /// Walks the whole tree; call from a blocking context.
    pub fn build_context(
        &self,
        chain: &ChainSettings,
        dockerfile: &str,
        wallet_data: Option<Vec<u8>>,
    ) -> Result<Bytes> {
        let mut context = BuildContext::new()
            .file(DOCKERFILE_NAME, dockerfile)
            .file(DEFAULT_CONF_NAME, default_conf(chain));
        if let Some(wallet_data) = wallet_data {
            context = context.file(WALLET_DATA_NAME, wallet_data);
        }
        Ok(context.archive(&self.root)?)
    }

    /// Run git in the codebase; returns (success, combined output).
    async fn git(&self, args: &[&str]) -> Result<(bool, String)> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok((output.status.success(), text.trim().to_owned()))
    }
}

/// Render the chain image's Dockerfile.
pub fn dockerfile(chain: &ChainSettings, with_wallet_data: bool) -> String {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let name = chain_name(chain);
    let conf_path = format!("{}{}", chain.config_dir, chain.conf_file);

    let wallet_step = if with_wallet_data {
        format!(
            " \\\n  && cp /opt/regnet/src/{WALLET_DATA_NAME} {}{WALLET_DATA_NAME}",
            chain.network_dir
        )
    } else {
        String::new()
    };

    format!(
        r#"FROM ubuntu:16.04

ARG cores={cores}
ENV ecores=$cores

RUN apt-get update \
  && apt-get install -y --no-install-recommends \
     software-properties-common ca-certificates wget curl git python \
     build-essential libtool autotools-dev bsdmainutils \
     libevent-dev autoconf automake pkg-config libssl-dev \
     libboost-system-dev libboost-filesystem-dev libboost-chrono-dev \
     libboost-program-options-dev libboost-test-dev libboost-thread-dev \
     libgmp-dev libminiupnpc-dev libzmq3-dev \
  && apt-get clean && rm -rf /var/lib/apt/lists/* /tmp/* /var/tmp/*

# Berkeley DB 4.8
RUN mkdir -p /tmp/berkeley \
  && cd /tmp/berkeley \
  && wget 'http://download.oracle.com/berkeley-db/db-4.8.30.NC.tar.gz' \
  && echo '12edc0df75bf9abd7f82f821795bcee50f42cb2e5f76a6a281b85732798364ef  db-4.8.30.NC.tar.gz' | sha256sum -c \
  && tar -xzf db-4.8.30.NC.tar.gz \
  && cd db-4.8.30.NC/build_unix/ \
  && ../dist/configure --enable-cxx --disable-shared --with-pic --prefix=/tmp/berkeley \
  && make install

COPY . /opt/regnet/src/

RUN mkdir -p {config_dir} {network_dir} \
  && ln -s {config_dir} /root/.{name} \
  && cp /opt/regnet/src/{DEFAULT_CONF_NAME} {conf_path}{wallet_step}

RUN cd /opt/regnet/src \
  && chmod +x ./autogen.sh \
  && ./autogen.sh \
  && ./configure LDFLAGS="-L/tmp/berkeley/lib/" CPPFLAGS="-I/tmp/berkeley/include/" --without-gui --enable-debug --enable-tests=0 \
  && make -j$ecores \
  && make install \
  && rm -rf /opt/regnet/src /tmp/berkeley

WORKDIR /opt/blockchain/
VOLUME ["{config_dir}", "{data_dir}"]

# P2P, RPC, remote debugger
EXPOSE {p2p} {rpc} {debug}

CMD ["{name}d", "-daemon=0", "-testnet=1", "-conf={conf_path}"]
"#,
        config_dir = chain.config_dir,
        network_dir = chain.network_dir,
        data_dir = chain.data_dir,
        p2p = chain.p2p_port,
        rpc = chain.rpc_port,
        debug = chain.debug_port,
    )
}

/// Configuration nodes boot with, before bootstrap replaces it.
fn default_conf(chain: &ChainSettings) -> String {
    format!(
        "datadir={}\n\
         testnet=1\n\
         dbcache=256\n\
         maxmempool=512\n\
         port={}\n\
         rpcport={}\n\
         listen=1\n\
         server=1\n\
         maxconnections=10\n\
         logtimestamps=1\n\
         logips=1\n\
         rpcuser={}\n\
         rpcpassword={}\n\
         rpcallowip=0.0.0.0/0\n\
         rpctimeout=15\n\
         rpcclienttimeout=15\n",
        chain.data_dir.trim_end_matches('/'),
        chain.p2p_port,
        chain.rpc_port,
        chain.rpc_user,
        chain.rpc_password,
    )
}

/// `blocknetdx-cli` -> `blocknetdx`.
fn chain_name(chain: &ChainSettings) -> &str {
    chain.cli.strip_suffix("-cli").unwrap_or(&chain.cli)
}
