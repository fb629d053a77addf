//! Typed model of the compose file that wires the database, the web admin and
//! the bot together, with the invariants the deployment relies on.
//!
//! `depends_on` only orders container creation. It does not mean the database
//! accepts connections, which is why every dependent entrypoint runs the
//! readiness gate itself.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Port the web admin listens on inside and outside the container.
pub const WEB_PORT: u16 = 8000;
const LOG_MOUNT: &str = "/app/logs";
const DATA_MOUNT: &str = "/var/lib/postgresql/data";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopologyError {
    #[error("YAML error: {0}")]
    Yaml(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("expected exactly one database service, found {0}")]
    DatabaseCount(usize),
    #[error("service {service} must depend on {database}")]
    MissingDependency { service: String, database: String },
    #[error("expected exactly one bridge network, found {0}")]
    NetworkCount(usize),
    #[error("service {service} is not attached to network {network}")]
    Detached { service: String, network: String },
    #[error("database data directory must be a declared named volume")]
    DataVolume,
    #[error("service {0} must bind-mount a host log directory at /app/logs")]
    LogMount(String),
    #[error("service {0} must use restart: unless-stopped")]
    RestartPolicy(String),
    #[error("service {0} must publish port 8000")]
    WebPort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    UnlessStopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env_file: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "DependsOn::is_empty")]
    pub depends_on: DependsOn,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartPolicy>,
}

/// `depends_on` in either compose spelling: a list of names, or a map from
/// name to start condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependsOn {
    Names(Vec<String>),
    Conditions(BTreeMap<String, Dependency>),
}

impl Default for DependsOn {
    fn default() -> Self {
        DependsOn::Names(Vec::new())
    }
}

impl DependsOn {
    pub fn contains(&self, service: &str) -> bool {
        match self {
            DependsOn::Names(names) => names.iter().any(|name| name == service),
            DependsOn::Conditions(map) => map.contains_key(service),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DependsOn::Names(names) => names.is_empty(),
            DependsOn::Conditions(map) => map.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
}

impl Service {
    fn is_database(&self) -> bool {
        self.image
            .as_deref()
            .is_some_and(|image| image == "postgres" || image.starts_with("postgres:"))
    }

    /// `(source, target)` pairs of the short volume syntax.
    fn mounts(&self) -> impl Iterator<Item = (&str, &str)> {
        self.volumes.iter().filter_map(|entry| {
            let mut parts = entry.splitn(3, ':');
            Some((parts.next()?, parts.next()?))
        })
    }
}

fn is_host_path(source: &str) -> bool {
    source.starts_with('/') || source.starts_with('.') || source.starts_with('~')
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub services: BTreeMap<String, Service>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    /// Named volumes; `name:` with no body is the common spelling.
    pub volumes: BTreeMap<String, Option<Volume>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Network>,
}

/// Knobs for [`Topology::standard`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyOptions {
    pub project: String,
    pub postgres_image: String,
    pub db_port: u16,
    pub env_file: String,
    pub log_dir: String,
    pub network: String,
    pub data_volume: String,
    pub server_command: Vec<String>,
    pub bot_command: Vec<String>,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            project: "shop".into(),
            postgres_image: "postgres:15".into(),
            db_port: 5432,
            env_file: ".env".into(),
            log_dir: "./logs".into(),
            network: "shop_network".into(),
            data_volume: "postgres_data".into(),
            server_command: vec![
                "gunicorn".into(),
                "django_app.config.wsgi:application".into(),
                "--bind".into(),
                format!("0.0.0.0:{WEB_PORT}"),
            ],
            bot_command: vec!["python".into(), "-m".into(), "bot.main".into()],
        }
    }
}

impl Topology {
    /// Database, web admin and bot on one bridge network.
    pub fn standard(opts: &TopologyOptions) -> Self {
        let network = vec![opts.network.clone()];
        let logs = format!("{}:{LOG_MOUNT}", opts.log_dir);
        let restart = Some(RestartPolicy::UnlessStopped);

        let mut db_env = BTreeMap::new();
        db_env.insert("POSTGRES_DB".to_string(), "${POSTGRES_DB}".to_string());
        db_env.insert("POSTGRES_USER".to_string(), "${POSTGRES_USER}".to_string());
        db_env.insert(
            "POSTGRES_PASSWORD".to_string(),
            "${POSTGRES_PASSWORD}".to_string(),
        );

        let db = Service {
            image: Some(opts.postgres_image.clone()),
            container_name: Some(format!("{}_db", opts.project)),
            environment: db_env,
            ports: vec![format!("{0}:{0}", opts.db_port)],
            volumes: vec![format!("{}:{DATA_MOUNT}", opts.data_volume)],
            networks: network.clone(),
            restart,
            ..Default::default()
        };

        let mut web_command = vec!["--".to_string()];
        web_command.extend(opts.server_command.iter().cloned());
        let web = Service {
            build: Some(".".into()),
            container_name: Some(format!("{}_web", opts.project)),
            entrypoint: Some(vec!["tg-shop-launcher".into()]),
            command: Some(web_command),
            env_file: vec![opts.env_file.clone()],
            ports: vec![format!("{WEB_PORT}:{WEB_PORT}")],
            volumes: vec![logs.clone()],
            depends_on: DependsOn::Names(vec!["db".into()]),
            networks: network.clone(),
            restart,
            ..Default::default()
        };

        let mut bot_command = vec!["--register-commands".to_string(), "--".to_string()];
        bot_command.extend(opts.bot_command.iter().cloned());
        let bot = Service {
            build: Some(".".into()),
            container_name: Some(format!("{}_bot", opts.project)),
            entrypoint: Some(vec!["bot_launcher".into()]),
            command: Some(bot_command),
            env_file: vec![opts.env_file.clone()],
            volumes: vec![logs],
            depends_on: DependsOn::Names(vec!["db".into()]),
            networks: network,
            restart,
            ..Default::default()
        };

        let mut services = BTreeMap::new();
        services.insert("db".to_string(), db);
        services.insert("web".to_string(), web);
        services.insert("bot".to_string(), bot);

        let mut volumes = BTreeMap::new();
        volumes.insert(opts.data_volume.clone(), None);

        let mut networks = BTreeMap::new();
        networks.insert(
            opts.network.clone(),
            Network {
                driver: Some("bridge".into()),
            },
        );

        Topology {
            services,
            volumes,
            networks,
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, TopologyError> {
        serde_yaml::from_str(yaml).map_err(|e| TopologyError::Yaml(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, TopologyError> {
        let content = std::fs::read_to_string(path).map_err(|e| TopologyError::Io(e.to_string()))?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String, TopologyError> {
        serde_yaml::to_string(self).map_err(|e| TopologyError::Yaml(e.to_string()))
    }

    /// Check the invariants the startup sequencing depends on.
    pub fn validate(&self) -> Result<(), TopologyError> {
        let databases: Vec<(&String, &Service)> = self
            .services
            .iter()
            .filter(|(_, svc)| svc.is_database())
            .collect();
        let [(db_name, db)] = databases.as_slice() else {
            return Err(TopologyError::DatabaseCount(databases.len()));
        };

        let bridges: Vec<&String> = self
            .networks
            .iter()
            .filter(|(_, net)| net.driver.as_deref().unwrap_or("bridge") == "bridge")
            .map(|(name, _)| name)
            .collect();
        if bridges.len() != 1 || self.networks.len() != 1 {
            return Err(TopologyError::NetworkCount(bridges.len()));
        }
        let network = bridges[0];

        let data_ok = db.mounts().any(|(source, target)| {
            target == DATA_MOUNT && !is_host_path(source) && self.volumes.contains_key(source)
        });
        if !data_ok {
            return Err(TopologyError::DataVolume);
        }

        for (name, svc) in &self.services {
            if !svc.networks.contains(network) {
                return Err(TopologyError::Detached {
                    service: name.clone(),
                    network: network.clone(),
                });
            }
            if svc.restart != Some(RestartPolicy::UnlessStopped) {
                return Err(TopologyError::RestartPolicy(name.clone()));
            }
            if name == *db_name {
                continue;
            }
            if !svc.depends_on.contains(db_name) {
                return Err(TopologyError::MissingDependency {
                    service: name.clone(),
                    database: (*db_name).clone(),
                });
            }
            let logs_ok = svc
                .mounts()
                .any(|(source, target)| target == LOG_MOUNT && is_host_path(source));
            if !logs_ok {
                return Err(TopologyError::LogMount(name.clone()));
            }
        }

        if let Some(web) = self.services.get("web") {
            let published = web
                .ports
                .iter()
                .any(|p| p.rsplit(':').next().and_then(|s| s.parse::<u16>().ok()) == Some(WEB_PORT));
            if !published {
                return Err(TopologyError::WebPort("web".into()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> Topology {
        Topology::standard(&TopologyOptions::default())
    }

    #[test]
    fn standard_topology_is_valid() {
        let topo = standard();
        topo.validate().unwrap();
        assert_eq!(topo.services.len(), 3);
        assert_eq!(topo.services["web"].ports, vec!["8000:8000"]);
        assert_eq!(
            topo.services["web"].command.as_ref().unwrap()[..2],
            ["--".to_string(), "gunicorn".to_string()]
        );
    }

    #[test]
    fn yaml_output_parses_back() {
        let topo = standard();
        let yaml = topo.to_yaml().unwrap();
        assert!(yaml.contains("unless-stopped"));
        assert!(yaml.contains("postgres_data:/var/lib/postgresql/data"));
        let parsed = Topology::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, topo);
    }

    #[test]
    fn second_database_is_rejected() {
        let mut topo = standard();
        let extra = topo.services["db"].clone();
        topo.services.insert("db2".into(), extra);
        assert_eq!(topo.validate(), Err(TopologyError::DatabaseCount(2)));
    }

    #[test]
    fn app_without_database_dependency_is_rejected() {
        let mut topo = standard();
        topo.services.get_mut("bot").unwrap().depends_on = DependsOn::default();
        assert!(matches!(
            topo.validate(),
            Err(TopologyError::MissingDependency { service, .. }) if service == "bot"
        ));
    }

    #[test]
    fn data_directory_must_be_named_volume() {
        let mut topo = standard();
        topo.services.get_mut("db").unwrap().volumes = vec![format!("./pgdata:{DATA_MOUNT}")];
        assert_eq!(topo.validate(), Err(TopologyError::DataVolume));

        let mut topo = standard();
        topo.volumes.clear();
        assert_eq!(topo.validate(), Err(TopologyError::DataVolume));
    }

    #[test]
    fn logs_must_be_host_mounted() {
        let mut topo = standard();
        topo.services.get_mut("web").unwrap().volumes = vec![format!("weblogs:{LOG_MOUNT}")];
        assert_eq!(topo.validate(), Err(TopologyError::LogMount("web".into())));
    }

    #[test]
    fn restart_policy_is_enforced() {
        let mut topo = standard();
        topo.services.get_mut("web").unwrap().restart = Some(RestartPolicy::OnFailure);
        assert_eq!(
            topo.validate(),
            Err(TopologyError::RestartPolicy("web".into()))
        );
    }

    #[test]
    fn every_service_shares_the_network() {
        let mut topo = standard();
        topo.services.get_mut("bot").unwrap().networks.clear();
        assert!(matches!(topo.validate(), Err(TopologyError::Detached { .. })));

        let mut topo = standard();
        topo.networks.insert("other".into(), Network::default());
        assert_eq!(topo.validate(), Err(TopologyError::NetworkCount(2)));
    }

    #[test]
    fn web_must_publish_port_8000() {
        let mut topo = standard();
        topo.services.get_mut("web").unwrap().ports = vec!["8080:8080".into()];
        assert_eq!(topo.validate(), Err(TopologyError::WebPort("web".into())));
    }
}
