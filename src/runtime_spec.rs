//! OCI runtime configuration generated from an image config
//!
//! The defaults follow what containerd produces for a new Linux container,
//! with the host network namespace, no `/run` mount, a terminal, and no
//! seccomp profile. The bundle root is always `/run/rootfs` in the guest.
//!
//! Reference: <https://github.com/opencontainers/runtime-spec/blob/main/config.md>

use crate::{
    errors::ImageError,
    filesystem::vfs::Filesystem,
    manifest::ImageConfigFile,
    passwd::{self, ExecUser},
};

pub const OCI_VERSION: &str = "1.0.2-dev";
pub const ROOT_PATH: &str = "/run/rootfs";
pub const DEFAULT_PATH_ENV: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const TERM_ENV: &str = "TERM=xterm";

const DEFAULT_CAPABILITIES: &[&str] = &[
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FSETID",
    "CAP_FOWNER",
    "CAP_MKNOD",
    "CAP_NET_RAW",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETFCAP",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_SYS_CHROOT",
    "CAP_KILL",
    "CAP_AUDIT_WRITE",
];

const MASKED_PATHS: &[&str] = &[
    "/proc/acpi",
    "/proc/asound",
    "/proc/kcore",
    "/proc/keys",
    "/proc/latency_stats",
    "/proc/timer_list",
    "/proc/timer_stats",
    "/proc/sched_debug",
    "/sys/firmware",
    "/proc/scsi",
];

const READONLY_PATHS: &[&str] = &[
    "/proc/bus",
    "/proc/fs",
    "/proc/irq",
    "/proc/sys",
    "/proc/sysrq-trigger",
];

const NAMESPACES: &[&str] = &["pid", "ipc", "uts", "mount"];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    pub oci_version: String,
    pub process: Process,
    pub root: Root,
    pub mounts: Vec<Mount>,
    pub linux: Linux,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    #[serde(default)]
    pub terminal: bool,
    pub user: User,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub capabilities: Capabilities,
    pub rlimits: Vec<Rlimit>,
    pub no_new_privileges: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub uid: u32,
    pub gid: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Capabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub inheritable: Vec<String>,
    pub permitted: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Rlimit {
    #[serde(rename = "type")]
    pub ty: String,
    pub hard: u64,
    pub soft: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Root {
    pub path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub source: String,
    pub options: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    pub resources: Resources,
    pub cgroups_path: String,
    pub namespaces: Vec<Namespace>,
    pub masked_paths: Vec<String>,
    pub readonly_paths: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Resources {
    pub devices: Vec<DeviceRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DeviceRule {
    pub allow: bool,
    pub access: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Namespace {
    #[serde(rename = "type")]
    pub ty: String,
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn mount(destination: &str, ty: &str, source: &str, options: &[&str]) -> Mount {
    Mount {
        destination: destination.to_owned(),
        ty: ty.to_owned(),
        source: source.to_owned(),
        options: strings(options),
    }
}

fn default_mounts() -> Vec<Mount> {
    vec![
        mount("/proc", "proc", "proc", &["nosuid", "noexec", "nodev"]),
        mount(
            "/dev",
            "tmpfs",
            "tmpfs",
            &["nosuid", "strictatime", "mode=755", "size=65536k"],
        ),
        mount(
            "/dev/pts",
            "devpts",
            "devpts",
            &[
                "nosuid",
                "noexec",
                "newinstance",
                "ptmxmode=0666",
                "mode=0620",
                "gid=5",
            ],
        ),
        mount(
            "/dev/shm",
            "tmpfs",
            "shm",
            &["nosuid", "noexec", "nodev", "mode=1777", "size=65536k"],
        ),
        mount("/dev/mqueue", "mqueue", "mqueue", &["nosuid", "noexec", "nodev"]),
        mount("/sys", "sysfs", "sysfs", &["nosuid", "noexec", "nodev", "ro"]),
    ]
}

/// Replace variables already present by name, append the rest
pub fn merge_env(base: &[String], overrides: &[String]) -> Vec<String> {
    fn key(var: &str) -> &str {
        var.split('=').next().unwrap_or(var)
    }
    let mut result: Vec<String> = base.to_vec();
    for var in overrides {
        match result.iter_mut().find(|existing| key(existing) == key(var)) {
            Some(existing) => *existing = var.clone(),
            None => result.push(var.clone()),
        }
    }
    result
}

impl Spec {
    /// Process settings before the image config is applied
    pub fn with_defaults() -> Self {
        let caps = strings(DEFAULT_CAPABILITIES);
        Spec {
            oci_version: OCI_VERSION.to_owned(),
            process: Process {
                terminal: false,
                user: User::default(),
                args: Vec::new(),
                env: vec![DEFAULT_PATH_ENV.to_owned()],
                cwd: "/".to_owned(),
                capabilities: Capabilities {
                    bounding: caps.clone(),
                    effective: caps.clone(),
                    inheritable: caps.clone(),
                    permitted: caps,
                },
                rlimits: vec![Rlimit {
                    ty: "RLIMIT_NOFILE".to_owned(),
                    hard: 1024,
                    soft: 1024,
                }],
                no_new_privileges: true,
            },
            root: Root {
                path: ROOT_PATH.to_owned(),
            },
            mounts: default_mounts(),
            linux: Linux {
                resources: Resources {
                    devices: vec![DeviceRule {
                        allow: false,
                        access: "rwm".to_owned(),
                    }],
                },
                cgroups_path: "/default/".to_owned(),
                namespaces: NAMESPACES
                    .iter()
                    .map(|ty| Namespace { ty: ty.to_string() })
                    .collect(),
                masked_paths: strings(MASKED_PATHS),
                readonly_paths: strings(READONLY_PATHS),
            },
        }
    }

    /// Apply the image config, with the user already resolved
    pub fn apply_image_config(&mut self, image: &ImageConfigFile, user: ExecUser) {
        let config = image.config.clone().unwrap_or_default();
        self.process.env = merge_env(&self.process.env, config.env.as_deref().unwrap_or(&[]));
        self.process.terminal = true;
        self.process.env.push(TERM_ENV.to_owned());
        self.process.user = User {
            uid: user.uid,
            gid: user.gid,
            additional_gids: user.sgids,
        };
        let mut args = config.entrypoint.unwrap_or_default();
        args.extend(config.cmd.unwrap_or_default());
        if !args.is_empty() {
            self.process.args = args;
        }
        match config.working_dir {
            Some(dir) if !dir.is_empty() => self.process.cwd = dir,
            _ => (),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, ImageError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Build the runtime spec for an image whose merged tree is `rootfs`
pub async fn generate(image: &ImageConfigFile, rootfs: &Filesystem) -> Result<Spec, ImageError> {
    let user = match image.config.as_ref().and_then(|c| c.user.as_deref()) {
        Some(name) if !name.is_empty() => {
            let user = passwd::resolve_in(rootfs, name).await?;
            log::debug!("user {:?} resolved to {:?}", name, user);
            user
        }
        _ => ExecUser::default(),
    };
    let mut spec = Spec::with_defaults();
    spec.apply_image_config(image, user);
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filesystem::vfs::{mode, FileData, Stat},
        manifest::ImageConfig,
    };
    use bytes::Bytes;
    use tokio::runtime::Runtime;

    fn image(config: ImageConfig) -> ImageConfigFile {
        ImageConfigFile {
            architecture: "amd64".to_owned(),
            os: "linux".to_owned(),
            config: Some(config),
        }
    }

    fn rootfs_with_passwd() -> Filesystem {
        let passwd: &'static [u8] = b"root:x:0:0:root:/root:/bin/sh\napp:x:1000:100::/home/app:/bin/sh\n";
        let mut fs = Filesystem::new();
        fs.writer()
            .write_file(
                std::path::Path::new("etc/passwd"),
                Stat {
                    st_mode: mode::S_IFREG | 0o644,
                    st_size: passwd.len() as u64,
                    ..Default::default()
                },
                FileData::Memory(Bytes::from_static(passwd)),
            )
            .unwrap();
        fs.finalize().unwrap();
        fs
    }

    #[test]
    fn env_overrides_by_name() {
        let base = vec!["PATH=/bin".to_owned(), "HOME=/".to_owned()];
        let merged = merge_env(&base, &["PATH=/opt/bin".to_owned(), "LANG=C".to_owned()]);
        assert_eq!(merged, vec!["PATH=/opt/bin", "HOME=/", "LANG=C"]);
    }

    #[test]
    fn image_config_applied() {
        let config = ImageConfig {
            user: Some("app".to_owned()),
            env: Some(vec!["PATH=/app/bin".to_owned(), "DEBUG=1".to_owned()]),
            entrypoint: Some(vec!["/app/run".to_owned()]),
            cmd: Some(vec!["--serve".to_owned()]),
            working_dir: Some("/app".to_owned()),
        };
        let fs = rootfs_with_passwd();
        let spec = Runtime::new()
            .unwrap()
            .block_on(generate(&image(config), &fs))
            .unwrap();
        assert_eq!(spec.process.args, vec!["/app/run", "--serve"]);
        assert_eq!(spec.process.env, vec!["PATH=/app/bin", "DEBUG=1", "TERM=xterm"]);
        assert_eq!(spec.process.cwd, "/app");
        assert_eq!((spec.process.user.uid, spec.process.user.gid), (1000, 100));
        assert!(spec.process.terminal);
        assert_eq!(spec.root.path, ROOT_PATH);
    }

    #[test]
    fn empty_config_keeps_defaults() {
        let fs = Filesystem::new();
        let spec = Runtime::new()
            .unwrap()
            .block_on(generate(&image(ImageConfig::default()), &fs))
            .unwrap();
        assert!(spec.process.args.is_empty());
        assert_eq!(spec.process.cwd, "/");
        assert_eq!(spec.process.env, vec![DEFAULT_PATH_ENV, TERM_ENV]);
        assert_eq!(spec.process.user, User::default());
        assert_eq!(spec.process.capabilities.bounding.len(), DEFAULT_CAPABILITIES.len());
    }

    #[test]
    fn unknown_user_fails() {
        let config = ImageConfig {
            user: Some("ghost".to_owned()),
            ..Default::default()
        };
        let fs = rootfs_with_passwd();
        assert!(Runtime::new()
            .unwrap()
            .block_on(generate(&image(config), &fs))
            .is_err());
    }

    #[test]
    fn json_field_names() {
        let json: serde_json::Value =
            serde_json::from_slice(&Spec::with_defaults().to_json().unwrap()).unwrap();
        assert_eq!(json["ociVersion"], OCI_VERSION);
        assert_eq!(json["process"]["noNewPrivileges"], true);
        assert_eq!(json["process"]["rlimits"][0]["type"], "RLIMIT_NOFILE");
        assert_eq!(json["mounts"][0]["type"], "proc");
        assert_eq!(json["linux"]["namespaces"][0]["type"], "pid");
        assert_eq!(json["linux"]["cgroupsPath"], "/default/");
        assert!(json["process"]["user"].get("additionalGids").is_none());
    }
}
