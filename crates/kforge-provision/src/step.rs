// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Named, versioned remote steps.
//!
//! Every remote mutation kforge performs is one variant of [`RemoteStep`].
//! A step's script is rendered only from the variant's typed fields, carries
//! a `# kforge step: <name> (v<version>)` header and runs under
//! `set -euo pipefail`. Config files are always written as full overwrites so
//! a step can be re-run safely.

use kforge_config::{ClusterConfig, RuntimeConfig};
use kforge_remote::RemoteScript;
use serde_json::json;

use crate::token::JoinToken;

/// Directory holding kforge's remote state markers.
pub const STATE_DIR: &str = "/var/lib/kforge";

/// Exit status of `InitControlPlane` when an earlier init attempt left its
/// lock behind without finishing. The node needs `kforge reset`.
pub const INIT_LOCK_HELD_EXIT: i32 = 75;

/// Printed by `InitControlPlane` when the node was already initialized.
pub const ALREADY_INITIALIZED: &str = "kforge: control plane already initialized";

/// Printed by `JoinWorker` when the node already has a kubelet config.
pub const ALREADY_JOINED: &str = "kforge: node already joined";

const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";
const KUBELET_KUBECONFIG: &str = "/etc/kubernetes/kubelet.conf";
const CLUSTER_PACKAGES: &str = "kubelet kubeadm kubectl";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStep {
	DisableSwap,
	UpgradePackages,
	InstallBaseDependencies,
	InstallContainerRuntime {
		cgroup_driver: String,
		storage_driver: String,
		log_max_size: String,
		log_max_file: u32,
	},
	ConfigureKernelNetworking,
	InstallClusterTooling {
		/// `MAJOR.MINOR`, selects the package repository.
		minor_version: String,
		/// Exact apt version, e.g. `1.30.2-1.1`.
		package_version: String,
	},
	EnableNodeAgent,
	InitControlPlane {
		advertise_address: String,
		api_server_port: u16,
		pod_network_cidr: String,
		kubernetes_version: String,
		ignore_preflight_errors: Vec<String>,
	},
	ConfigureKubeconfig {
		user: String,
	},
	InstallNetworkPlugin {
		manifest: String,
	},
	IssueJoinCredential {
		ttl_hours: u32,
	},
	JoinWorker {
		endpoint: String,
		token: JoinToken,
		ca_cert_hash: String,
		ignore_preflight_errors: Vec<String>,
	},
	ListNodes,
	ResetNode,
}

impl RemoteStep {
	pub fn install_container_runtime(runtime: &RuntimeConfig) -> Self {
		RemoteStep::InstallContainerRuntime {
			cgroup_driver: runtime.cgroup_driver.clone(),
			storage_driver: runtime.storage_driver.clone(),
			log_max_size: runtime.log_max_size.clone(),
			log_max_file: runtime.log_max_file,
		}
	}

	pub fn install_cluster_tooling(cluster: &ClusterConfig) -> Self {
		RemoteStep::InstallClusterTooling {
			minor_version: cluster.minor_version(),
			package_version: cluster.package_version(),
		}
	}

	pub fn init_control_plane(advertise_address: &str, cluster: &ClusterConfig) -> Self {
		RemoteStep::InitControlPlane {
			advertise_address: advertise_address.to_string(),
			api_server_port: cluster.api_server_port,
			pod_network_cidr: cluster.pod_network_cidr.clone(),
			kubernetes_version: cluster.kubernetes_version.clone(),
			ignore_preflight_errors: cluster.ignore_preflight_errors.clone(),
		}
	}

	/// Stable identifier, used in logs, reports and mock matching.
	pub fn name(&self) -> &'static str {
		match self {
			RemoteStep::DisableSwap => "disable-swap",
			RemoteStep::UpgradePackages => "upgrade-packages",
			RemoteStep::InstallBaseDependencies => "install-base-dependencies",
			RemoteStep::InstallContainerRuntime { .. } => "install-container-runtime",
			RemoteStep::ConfigureKernelNetworking => "configure-kernel-networking",
			RemoteStep::InstallClusterTooling { .. } => "install-cluster-tooling",
			RemoteStep::EnableNodeAgent => "enable-node-agent",
			RemoteStep::InitControlPlane { .. } => "init-control-plane",
			RemoteStep::ConfigureKubeconfig { .. } => "configure-kubeconfig",
			RemoteStep::InstallNetworkPlugin { .. } => "install-network-plugin",
			RemoteStep::IssueJoinCredential { .. } => "issue-join-credential",
			RemoteStep::JoinWorker { .. } => "join-worker",
			RemoteStep::ListNodes => "list-nodes",
			RemoteStep::ResetNode => "reset-node",
		}
	}

	/// Bumped whenever a step's script changes meaning.
	pub fn version(&self) -> u32 {
		1
	}

	/// Whether re-running the step on an already-converged node is a no-op.
	pub fn idempotent(&self) -> bool {
		// Each call mints a new bootstrap token.
		!matches!(self, RemoteStep::IssueJoinCredential { .. })
	}

	/// Render the complete script for this step.
	pub fn render(&self) -> RemoteScript {
		let mut body = format!(
			"#!/usr/bin/env bash\n# kforge step: {} (v{})\nset -euo pipefail\nexport DEBIAN_FRONTEND=noninteractive\n\n",
			self.name(),
			self.version()
		);
		body.push_str(&self.render_body());
		RemoteScript::new(self.name(), body)
	}

	fn render_body(&self) -> String {
		match self {
			RemoteStep::DisableSwap => "swapoff -a\n\
				# Comment out live swap entries; already-commented lines are left alone.\n\
				sed -ri '/^[^#].*[[:space:]]swap[[:space:]]/ s/^/#/' /etc/fstab\n"
				.to_string(),

			RemoteStep::UpgradePackages => "apt-get update -q\n\
				apt-get upgrade -y -q -o Dpkg::Options::=--force-confdef -o Dpkg::Options::=--force-confold\n"
				.to_string(),

			RemoteStep::InstallBaseDependencies => "apt-get update -q\n\
				apt-get install -y -q apt-transport-https ca-certificates curl gpg socat conntrack\n"
				.to_string(),

			RemoteStep::InstallContainerRuntime {
				cgroup_driver,
				storage_driver,
				log_max_size,
				log_max_file,
			} => render_container_runtime(cgroup_driver, storage_driver, log_max_size, *log_max_file),

			RemoteStep::ConfigureKernelNetworking => "cat > /etc/modules-load.d/k8s.conf <<'KFORGE_EOF'\n\
				overlay\n\
				br_netfilter\n\
				KFORGE_EOF\n\
				modprobe overlay\n\
				modprobe br_netfilter\n\
				cat > /etc/sysctl.d/k8s.conf <<'KFORGE_EOF'\n\
				net.bridge.bridge-nf-call-iptables  = 1\n\
				net.bridge.bridge-nf-call-ip6tables = 1\n\
				net.ipv4.ip_forward                 = 1\n\
				KFORGE_EOF\n\
				sysctl --system\n"
				.to_string(),

			RemoteStep::InstallClusterTooling {
				minor_version,
				package_version,
			} => {
				let repo = format!("https://pkgs.k8s.io/core:/stable:/v{minor_version}/deb/");
				let keyring = "/etc/apt/keyrings/kubernetes-apt-keyring.gpg";
				let pinned = CLUSTER_PACKAGES
					.split(' ')
					.map(|p| quote(&format!("{p}={package_version}")))
					.collect::<Vec<_>>()
					.join(" ");
				format!(
					"install -d -m 0755 /etc/apt/keyrings\n\
					 curl -fsSL {key_url} | gpg --batch --yes --dearmor -o {keyring}\n\
					 echo {source_line} > /etc/apt/sources.list.d/kubernetes.list\n\
					 apt-get update -q\n\
					 apt-mark unhold {CLUSTER_PACKAGES} >/dev/null 2>&1 || true\n\
					 apt-get install -y -q --allow-downgrades --allow-change-held-packages {pinned}\n\
					 apt-mark hold {CLUSTER_PACKAGES}\n",
					key_url = quote(&format!("{repo}Release.key")),
					source_line = quote(&format!("deb [signed-by={keyring}] {repo} /")),
				)
			}

			RemoteStep::EnableNodeAgent => "systemctl enable --now kubelet\n".to_string(),

			RemoteStep::InitControlPlane {
				advertise_address,
				api_server_port,
				pod_network_cidr,
				kubernetes_version,
				ignore_preflight_errors,
			} => format!(
				"install -d -m 0700 {STATE_DIR}\n\
				 if [ -f {STATE_DIR}/init.done ]; then\n\
				 \techo {already}\n\
				 \texit 0\n\
				 fi\n\
				 if ! mkdir {STATE_DIR}/init.lock 2>/dev/null; then\n\
				 \techo 'kforge: an earlier init attempt did not finish; run kforge reset first' >&2\n\
				 \texit {INIT_LOCK_HELD_EXIT}\n\
				 fi\n\
				 kubeadm init --apiserver-advertise-address={addr} --apiserver-bind-port={api_server_port} \
				 --pod-network-cidr={cidr} --kubernetes-version={version}{preflight}\n\
				 touch {STATE_DIR}/init.done\n",
				already = quote(ALREADY_INITIALIZED),
				addr = quote(advertise_address),
				cidr = quote(pod_network_cidr),
				version = quote(&format!("v{kubernetes_version}")),
				preflight = preflight_flag(ignore_preflight_errors),
			),

			RemoteStep::ConfigureKubeconfig { user } => {
				let user = quote(user);
				format!(
					"home_dir=$(getent passwd {user} | cut -d: -f6)\n\
					 group=$(id -gn {user})\n\
					 install -d -m 0700 -o {user} -g \"$group\" \"$home_dir/.kube\"\n\
					 install -m 0600 -o {user} -g \"$group\" {ADMIN_KUBECONFIG} \"$home_dir/.kube/config\"\n"
				)
			}

			RemoteStep::InstallNetworkPlugin { manifest } => format!(
				"kubectl --kubeconfig {ADMIN_KUBECONFIG} apply -f {}\n",
				quote(manifest)
			),

			RemoteStep::IssueJoinCredential { ttl_hours } => format!(
				"kubeadm token create --ttl {ttl_hours}h0m0s --print-join-command\n"
			),

			RemoteStep::JoinWorker {
				endpoint,
				token,
				ca_cert_hash,
				ignore_preflight_errors,
			} => format!(
				"if [ -f {KUBELET_KUBECONFIG} ]; then\n\
				 \techo {already}\n\
				 \texit 0\n\
				 fi\n\
				 kubeadm join {endpoint} --token {token} --discovery-token-ca-cert-hash {hash}{preflight}\n",
				already = quote(ALREADY_JOINED),
				endpoint = quote(endpoint),
				token = quote(token.expose()),
				hash = quote(ca_cert_hash),
				preflight = preflight_flag(ignore_preflight_errors),
			),

			RemoteStep::ListNodes => {
				format!("kubectl --kubeconfig {ADMIN_KUBECONFIG} get nodes -o json\n")
			}

			RemoteStep::ResetNode => format!(
				"if command -v kubeadm >/dev/null 2>&1; then\n\
				 \tkubeadm reset -f\n\
				 fi\n\
				 rm -rf {STATE_DIR}/init.lock {STATE_DIR}/init.done /etc/cni/net.d\n"
			),
		}
	}
}

fn render_container_runtime(
	cgroup_driver: &str,
	storage_driver: &str,
	log_max_size: &str,
	log_max_file: u32,
) -> String {
	let daemon = json!({
		"exec-opts": [format!("native.cgroupdriver={cgroup_driver}")],
		"log-driver": "json-file",
		"log-opts": {
			"max-size": log_max_size,
			"max-file": log_max_file.to_string(),
		},
		"storage-driver": storage_driver,
	});
	// serde_json::Value always serializes.
	let daemon = serde_json::to_string_pretty(&daemon).unwrap_or_default();
	let systemd_cgroup = if cgroup_driver == "systemd" {
		"true"
	} else {
		"false"
	};

	format!(
		"if ! command -v dockerd >/dev/null 2>&1 || ! command -v containerd >/dev/null 2>&1; then\n\
		 \tapt-get update -q\n\
		 \tapt-get install -y -q docker.io containerd\n\
		 fi\n\
		 install -d -m 0755 /etc/docker /etc/containerd\n\
		 cat > /etc/docker/daemon.json <<'KFORGE_EOF'\n\
		 {daemon}\n\
		 KFORGE_EOF\n\
		 containerd config default > /etc/containerd/config.toml\n\
		 sed -ri 's/^([[:space:]]*SystemdCgroup[[:space:]]*=).*/\\1 {systemd_cgroup}/' /etc/containerd/config.toml\n\
		 systemctl daemon-reload\n\
		 systemctl enable containerd docker\n\
		 systemctl restart containerd docker\n"
	)
}

fn preflight_flag(errors: &[String]) -> String {
	if errors.is_empty() {
		String::new()
	} else {
		format!(" --ignore-preflight-errors={}", quote(&errors.join(",")))
	}
}

/// Single-quote a value for bash.
pub fn quote(value: &str) -> String {
	format!("'{}'", value.replace('\'', r"'\''"))
}
