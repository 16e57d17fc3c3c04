//! Feature installation flow against a mock registry
//!
//! Serves a real single-layer feature bundle (metadata + install.sh) from
//! wiremock and runs the whole install: option resolution, remote-user
//! probing, script execution through the shell, and profile.d persistence.

use flate2::write::GzEncoder;
use flate2::Compression;
use indexmap::IndexMap;
use serial_test::serial;
use sha2::{Digest, Sha256};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nanolayer_core::feature_installer::FeatureInstaller;
use nanolayer_core::oci::OciRegistry;

fn sha256_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{:x}", hasher.finalize())
}

/// A bundle whose install.sh records its interesting env vars
fn feature_tarball(marker_path: &Path) -> Vec<u8> {
    let metadata = r#"{
        "id": "bash-command",
        "version": "1.0.0",
        "options": {
            "command": {"type": "string", "default": "echo default"}
        },
        "containerEnv": {"BASH_COMMAND_INSTALLED": "1"}
    }"#;
    let install_sh = format!(
        "#!/bin/bash\nprintf '%s\\n' \"$COMMAND\" \"$_REMOTE_USER\" \"$_REMOTE_USER_HOME\" > {}\n",
        marker_path.display()
    );

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, data) in [
        ("devcontainer-feature.json", metadata.as_bytes()),
        ("install.sh", install_sh.as_bytes()),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

async fn mount_feature(server: &MockServer, tarball: &[u8]) {
    let digest = sha256_digest(tarball);
    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "layers": [{
            "mediaType": "application/vnd.devcontainers.layer.v1+tar",
            "size": tarball.len(),
            "digest": digest,
            "annotations": {
                "org.opencontainers.image.title": "devcontainer-feature-bash-command.tgz"
            }
        }]
    });

    Mock::given(method("GET"))
        .and(path("/v2/owner/bash-command/manifests/1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            manifest.to_string(),
            "application/vnd.oci.image.manifest.v1+json",
        ))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/v2/owner/bash-command/blobs/{}", digest)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tarball.to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
#[serial]
async fn test_feature_install_end_to_end() {
    let server = MockServer::start().await;
    let scratch = tempfile::tempdir().unwrap();
    let marker_path = scratch.path().join("marker");
    let profile_dir = scratch.path().join("profile.d");

    let tarball = feature_tarball(&marker_path);
    mount_feature(&server, &tarball).await;

    let registry_host = server.uri().replace("http://", "");
    let feature_ref = format!("{}/owner/bash-command:1.0.0", registry_host);

    // SUDO_UID satisfies the privilege gate without actual root
    std::env::set_var("SUDO_UID", "1000");

    let installer =
        FeatureInstaller::with_registry(OciRegistry::insecure().unwrap(), profile_dir.clone());

    let mut options = IndexMap::new();
    options.insert("command".to_string(), "echo from-test".to_string());

    let result = installer
        .install(&feature_ref, options, IndexMap::new(), None, false)
        .await;

    std::env::remove_var("SUDO_UID");
    result.unwrap();

    // install.sh ran with the resolved option and remote user
    let marker = std::fs::read_to_string(&marker_path).unwrap();
    let lines: Vec<&str> = marker.lines().collect();
    assert_eq!(lines[0], "echo from-test");
    assert!(!lines[1].is_empty(), "remote user resolved: {:?}", lines);
    assert!(!lines[2].is_empty(), "remote user home resolved: {:?}", lines);

    // the containerEnv landed in profile.d
    let profile_file = profile_dir.join("nanolayer-bash-command.sh");
    let profile = std::fs::read_to_string(&profile_file).unwrap();
    assert!(profile.contains("export BASH_COMMAND_INSTALLED=1"));
}

#[tokio::test]
#[serial]
async fn test_feature_install_twice_is_env_idempotent() {
    let server = MockServer::start().await;
    let scratch = tempfile::tempdir().unwrap();
    let marker_path = scratch.path().join("marker");
    let profile_dir = scratch.path().join("profile.d");

    let tarball = feature_tarball(&marker_path);
    mount_feature(&server, &tarball).await;

    let registry_host = server.uri().replace("http://", "");
    let feature_ref = format!("{}/owner/bash-command:1.0.0", registry_host);

    std::env::set_var("SUDO_UID", "1000");

    let installer =
        FeatureInstaller::with_registry(OciRegistry::insecure().unwrap(), profile_dir.clone());

    let first = installer
        .install(&feature_ref, IndexMap::new(), IndexMap::new(), None, false)
        .await;
    let second = installer
        .install(&feature_ref, IndexMap::new(), IndexMap::new(), None, false)
        .await;

    std::env::remove_var("SUDO_UID");
    first.unwrap();
    second.unwrap();

    // the option fell back to its declared default
    let marker = std::fs::read_to_string(&marker_path).unwrap();
    assert_eq!(marker.lines().next(), Some("echo default"));

    // exactly one copy of the export line after two runs
    let profile = std::fs::read_to_string(profile_dir.join("nanolayer-bash-command.sh")).unwrap();
    assert_eq!(profile.matches("export BASH_COMMAND_INSTALLED=1").count(), 1);
}

#[tokio::test]
#[serial]
async fn test_feature_with_multiple_layers_rejected() {
    let server = MockServer::start().await;

    let manifest = serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "layers": [
            {"mediaType": "application/vnd.oci.image.layer.v1.tar", "size": 1, "digest": "sha256:aa"},
            {"mediaType": "application/vnd.oci.image.layer.v1.tar", "size": 1, "digest": "sha256:bb"}
        ]
    });
    Mock::given(method("GET"))
        .and(path("/v2/owner/bash-command/manifests/1.0.0"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            manifest.to_string(),
            "application/vnd.oci.image.manifest.v1+json",
        ))
        .mount(&server)
        .await;

    let registry_host = server.uri().replace("http://", "");
    let feature_ref = format!("{}/owner/bash-command:1.0.0", registry_host);

    std::env::set_var("SUDO_UID", "1000");

    let scratch = tempfile::tempdir().unwrap();
    let installer = FeatureInstaller::with_registry(
        OciRegistry::insecure().unwrap(),
        scratch.path().join("profile.d"),
    );
    let result = installer
        .install(&feature_ref, IndexMap::new(), IndexMap::new(), None, false)
        .await;

    std::env::remove_var("SUDO_UID");
    let err = result.unwrap_err();
    assert!(err.to_string().contains("1 layer"), "{}", err);
}
