//! gh-release flow tests against a mock GitHub API
//!
//! Covers tag enumeration through the releases endpoint, asset selection
//! over wire payloads, and one full install (resolve → select → download →
//! place) into a scratch prefix.

use flate2::write::GzEncoder;
use flate2::Compression;
use serial_test::serial;
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nanolayer_core::errors::{NanolayerError, ResolveError};
use nanolayer_core::gh_release::{
    AssetResolver, AssetResolverOptions, GhReleaseInstaller, InstallRequest, ReleaseResolver,
    SelectionHost,
};
use nanolayer_core::host::{Architecture, Bitness, LinuxReleaseId};

fn releases_body(tags: &[&str]) -> String {
    let releases: Vec<serde_json::Value> = tags
        .iter()
        .map(|tag| serde_json::json!({"tag_name": tag}))
        .collect();
    serde_json::to_string(&releases).unwrap()
}

fn debian_amd64() -> SelectionHost {
    SelectionHost {
        architecture: Architecture::X86_64,
        bitness: Bitness::B64Bit,
        release_id: LinuxReleaseId::Debian,
        release_id_like: LinuxReleaseId::Debian,
    }
}

fn single_member_tarball(member: &str, data: &[u8]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, member, data).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

#[tokio::test]
async fn test_resolve_latest_release_via_api() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/ahmetb/kubectx/releases"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(releases_body(&["v0.9.3", "v0.9.5", "v0.9.4"]), "application/json"),
        )
        .mount(&server)
        .await;

    let resolver = ReleaseResolver::with_api_base(&server.uri()).unwrap();
    let tag = resolver
        .resolve("latest", "ahmetb/kubectx", None, false)
        .await
        .unwrap();
    assert_eq!(tag, "v0.9.5");
}

#[tokio::test]
async fn test_resolve_exact_version_via_api() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/tool/releases"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(releases_body(&["v1.0.0", "v1.1.0"]), "application/json"),
        )
        .mount(&server)
        .await;

    let resolver = ReleaseResolver::with_api_base(&server.uri()).unwrap();
    // a bare version matches its v-prefixed tag
    let tag = resolver.resolve("1.1.0", "owner/tool", None, false).await.unwrap();
    assert_eq!(tag, "v1.1.0");

    let err = resolver
        .resolve("9.9.9", "owner/tool", None, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NanolayerError::Resolve(ResolveError::ReleaseNotFound { .. })
    ));
}

#[tokio::test]
async fn test_resolve_with_tag_regex() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/tool/releases"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            releases_body(&["nightly-2024-01-02", "v1.2.0", "v1.10.0", "nightly-2024-03-01"]),
            "application/json",
        ))
        .mount(&server)
        .await;

    let resolver = ReleaseResolver::with_api_base(&server.uri()).unwrap();
    let tag = resolver
        .resolve("latest", "owner/tool", Some(r"v[0-9]"), false)
        .await
        .unwrap();
    assert_eq!(tag, "v1.10.0");
}

#[tokio::test]
async fn test_asset_resolution_via_api() {
    let server = MockServer::start().await;

    let body = serde_json::json!({
        "assets": [
            {"name": "tool_v1_checksums.txt", "browser_download_url": "u", "size": 10},
            {"name": "tool_v1_linux_arm64.tar.gz", "browser_download_url": "u", "size": 10},
            {"name": "tool_v1_linux_x86_64.tar.gz", "browser_download_url": "u", "size": 10},
            {"name": "tool_v1_darwin_x86_64.tar.gz", "browser_download_url": "u", "size": 10}
        ]
    });
    Mock::given(method("GET"))
        .and(path("/repos/owner/tool/releases/tags/v1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "application/json"))
        .mount(&server)
        .await;

    let resolver = AssetResolver::with_api_base(&server.uri()).unwrap();
    let asset = resolver
        .resolve(
            "owner/tool",
            "v1",
            &["tool".to_string()],
            &debian_amd64(),
            &AssetResolverOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(asset.name, "tool_v1_linux_x86_64.tar.gz");
}

#[tokio::test]
async fn test_missing_release_maps_to_no_release() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/owner/tool/releases/tags/v404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let resolver = AssetResolver::with_api_base(&server.uri()).unwrap();
    let err = resolver
        .resolve(
            "owner/tool",
            "v404",
            &["tool".to_string()],
            &debian_amd64(),
            &AssetResolverOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NanolayerError::Resolve(ResolveError::NoRelease { .. })
    ));
}

#[tokio::test]
#[serial]
async fn test_end_to_end_install() {
    // the flow probes /etc/os-release for distro preferences
    if !Path::new("/etc/os-release").exists() {
        return;
    }

    let server = MockServer::start().await;
    let tarball = single_member_tarball("tool-v1.0.0-bin", b"#!/bin/sh\necho tool\n");

    Mock::given(method("GET"))
        .and(path("/repos/owner/tool/releases"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(releases_body(&["v1.0.0"]), "application/json"),
        )
        .mount(&server)
        .await;

    let release_body = serde_json::json!({
        "assets": [
            {
                "name": "tool_v1.0.0_linux_x86_64.tar.gz",
                "browser_download_url": format!("{}/download/tool.tar.gz", server.uri()),
                "size": tarball.len()
            },
            {
                "name": "tool_v1.0.0_checksums.txt",
                "browser_download_url": format!("{}/download/checksums.txt", server.uri()),
                "size": 64
            }
        ]
    });
    Mock::given(method("GET"))
        .and(path("/repos/owner/tool/releases/tags/v1.0.0"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(release_body.to_string(), "application/json"),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/tool.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tarball.clone()))
        .mount(&server)
        .await;

    let prefix = tempfile::tempdir().unwrap();
    let bin_location = prefix.path().join("bin");
    let lib_location = prefix.path().join("lib");

    // SUDO_UID satisfies the privilege gate without actual root
    std::env::set_var("SUDO_UID", "1000");

    let request = InstallRequest {
        bin_location: Some(bin_location.clone()),
        lib_location: Some(lib_location),
        arch: Some(Architecture::X86_64),
        ..InstallRequest::new("owner/tool", vec!["tool".to_string()])
    };

    let installer = GhReleaseInstaller::with_api_base(&server.uri()).unwrap();
    let result = installer.install(&request).await;

    std::env::remove_var("SUDO_UID");
    result.unwrap();

    let installed = bin_location.join("tool");
    assert_eq!(std::fs::read(&installed).unwrap(), b"#!/bin/sh\necho tool\n");

    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(&installed).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o755);
}

#[tokio::test]
#[serial]
async fn test_install_refuses_existing_target() {
    if !Path::new("/etc/os-release").exists() {
        return;
    }

    let server = MockServer::start().await;
    let prefix = tempfile::tempdir().unwrap();
    let bin_location = prefix.path().join("bin");
    std::fs::create_dir_all(&bin_location).unwrap();
    std::fs::write(bin_location.join("tool"), b"already here").unwrap();

    std::env::set_var("SUDO_UID", "1000");

    let request = InstallRequest {
        bin_location: Some(bin_location),
        lib_location: Some(prefix.path().join("lib")),
        ..InstallRequest::new("owner/tool", vec!["tool".to_string()])
    };

    let installer = GhReleaseInstaller::with_api_base(&server.uri()).unwrap();
    let result = installer.install(&request).await;

    std::env::remove_var("SUDO_UID");
    // fails before any resolution happens, so no mocks are needed
    assert!(result.is_err());
}
