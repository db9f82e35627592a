//! End-to-end coverage for configuration intake (§6): a two-service
//! deployment with a `requires` edge, ports, and link-variable
//! synthesis, built entirely through `fleetship`'s public surface.

use std::collections::HashMap;

use fleetship::{GraphBuilder, RawConfig, RawInstance, RawLimits, RawSchema, RawService, RawShip};

fn ship(docker_port: u16) -> RawShip {
    RawShip {
        ip: "127.0.0.1".parse().unwrap(),
        endpoint: None,
        docker_port: Some(docker_port),
        socket_path: None,
        timeout: Some(1),
        ssh_tunnel: None,
        tls: false,
        tls_verify: false,
        tls_ca_cert: None,
        tls_cert: None,
        tls_key: None,
    }
}

fn instance(ship_name: &str, ports: HashMap<String, serde_json::Value>) -> RawInstance {
    RawInstance {
        ship: ship_name.to_string(),
        image: None,
        command: None,
        ports,
        env: HashMap::new(),
        volumes: HashMap::new(),
        container_volumes: Vec::new(),
        volumes_from: Vec::new(),
        links: HashMap::new(),
        privileged: false,
        net: None,
        pid: None,
        restart: None,
        dns: Vec::new(),
        stop_timeout: None,
        limits: RawLimits::default(),
        workdir: None,
        lifecycle: HashMap::new(),
    }
}

/// A `db` service that `web` requires, each with one instance; `db`
/// publishes a named port so link variables are non-trivial.
fn sample_config() -> RawConfig {
    let mut ships = HashMap::new();
    ships.insert("host1".to_string(), ship(1));
    ships.insert("host2".to_string(), ship(2));

    let mut db_ports = HashMap::new();
    db_ports.insert("sql".to_string(), serde_json::json!(5432));
    let mut db_instances = HashMap::new();
    db_instances.insert("db1".to_string(), instance("host1", db_ports));

    let mut web_instances = HashMap::new();
    web_instances.insert("web1".to_string(), instance("host2", HashMap::new()));

    let mut services = HashMap::new();
    services.insert(
        "db".to_string(),
        RawService {
            image: "postgres:16".to_string(),
            omit: false,
            env: HashMap::new(),
            requires: Vec::new(),
            wants_info: Vec::new(),
            instances: db_instances,
        },
    );
    services.insert(
        "web".to_string(),
        RawService {
            image: "web:latest".to_string(),
            omit: false,
            env: HashMap::new(),
            requires: vec!["db".to_string()],
            wants_info: Vec::new(),
            instances: web_instances,
        },
    );

    RawConfig {
        ships,
        registries: HashMap::new(),
        services,
        schema: RawSchema::default(),
    }
}

#[tokio::test]
async fn builds_deployment_with_dependency_and_link_variables() {
    let deployment = GraphBuilder::new("integration-test", true)
        .build(sample_config())
        .await
        .expect("valid configuration should build");

    assert_eq!(deployment.ships.len(), 2);
    assert_eq!(deployment.services.len(), 2);

    let web = &deployment.services["web"];
    assert!(web.requires().contains("db"));

    let db = &deployment.services["db"];
    assert!(db.needed_for().contains("web"));
    assert!(db.container("db1").is_some());

    let closure = web
        .requires_closure(&deployment.services)
        .expect("acyclic requires graph");
    assert!(closure.contains("db"));

    let vars = db.link_variables(true);
    assert_eq!(vars.get("DB_DB1_HOST").map(String::as_str), Some("127.0.0.1"));
    assert_eq!(vars.get("DB_DB1_SQL_PORT").map(String::as_str), Some("5432"));
    assert_eq!(vars.get("DB_DB1_SQL_INTERNAL_PORT").map(String::as_str), Some("5432"));
    assert_eq!(vars.get("DB_INSTANCES").map(String::as_str), Some("db1"));
}

#[tokio::test]
async fn rejects_requires_cycle_before_connecting_any_ship() {
    let mut raw = sample_config();
    raw.services.get_mut("db").unwrap().requires = vec!["web".to_string()];

    let result = GraphBuilder::new("integration-test", false)
        .build(raw)
        .await;

    assert!(result.is_err());
}

#[tokio::test]
async fn rejects_duplicate_instance_names_across_services() {
    let mut raw = sample_config();
    let db1 = raw.services["db"].instances["db1"].clone();
    raw.services
        .get_mut("web")
        .unwrap()
        .instances
        .insert("db1".to_string(), db1);

    let result = GraphBuilder::new("integration-test", false)
        .build(raw)
        .await;

    assert!(result.is_err());
}
