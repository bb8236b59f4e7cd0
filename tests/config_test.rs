use std::io::Write;

use clustord::config::Config;

fn write_temp_toml(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn loads_defaults_for_omitted_fields() {
    let file = write_temp_toml(
        r#"
        localhost = "n1"
        "#,
    );
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.raw_port, 1214);
    assert_eq!(config.https_port, 1215);
    assert_eq!(config.metrics_port, 9100);
    assert_eq!(config.log_level, "info");
    assert!(config.cluster_nodes.is_empty());
    assert!(config.objects.is_empty());
}

#[tokio::test]
async fn rejects_empty_localhost() {
    let file = write_temp_toml(
        r#"
        localhost = ""
        "#,
    );
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}

#[tokio::test]
async fn rejects_colliding_ports() {
    let file = write_temp_toml(
        r#"
        localhost = "n1"
        raw_port = 1214
        https_port = 1214
        "#,
    );
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}

#[tokio::test]
async fn rejects_metrics_port_collision() {
    let file = write_temp_toml(
        r#"
        localhost = "n1"
        raw_port = 1214
        https_port = 1215
        metrics_port = 1214
        "#,
    );
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}

#[tokio::test]
async fn rejects_object_with_empty_scope() {
    let file = write_temp_toml(
        r#"
        localhost = "n1"

        [[objects]]
        path = "default/svc/s1"
        scope = []
        "#,
    );
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}

#[tokio::test]
async fn derives_filesystem_layout_under_root() {
    let file = write_temp_toml(
        r#"
        localhost = "n1"
        root = "/var/lib/clustord-test"
        "#,
    );
    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(
        config.certs_dir(),
        std::path::Path::new("/var/lib/clustord-test/certs")
    );
    assert_eq!(
        config.lsnr_dir(),
        std::path::Path::new("/var/lib/clustord-test/lsnr")
    );
}
