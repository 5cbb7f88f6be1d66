//! Mirror catalog for every remote resource the installers fetch.
//!
//! Entries are fixed at construction. Measured latency lives in a separate
//! table and only affects ordering in [`MirrorCatalog::ranked`], never which
//! URL [`MirrorCatalog::resolve`] returns.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{BootError, Result};

/// Resource kinds that have alternate sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MirrorKind {
    Toolchain,
    Vcs,
    PackageIndex,
    Repository,
}

impl MirrorKind {
    pub fn all() -> [MirrorKind; 4] {
        [
            MirrorKind::Toolchain,
            MirrorKind::Vcs,
            MirrorKind::PackageIndex,
            MirrorKind::Repository,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorKind::Toolchain => "toolchain",
            MirrorKind::Vcs => "vcs",
            MirrorKind::PackageIndex => "package_index",
            MirrorKind::Repository => "repository",
        }
    }

}

impl FromStr for MirrorKind {
    type Err = BootError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "toolchain" | "python" => Ok(MirrorKind::Toolchain),
            "vcs" | "git" => Ok(MirrorKind::Vcs),
            "package_index" | "packages" | "pip" => Ok(MirrorKind::PackageIndex),
            "repository" | "repo" => Ok(MirrorKind::Repository),
            _ => Err(BootError::Config(format!(
                "Unknown mirror kind '{}'. Use toolchain, vcs, packages or repository",
                s
            ))),
        }
    }
}

impl std::fmt::Display for MirrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorEntry {
    pub key: String,
    pub display_name: String,
    pub url: String,
}

impl MirrorEntry {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
            url: url.into(),
        }
    }
}

/// A mirror together with its last measured latency, if any.
#[derive(Debug, Clone, Serialize)]
pub struct RankedMirror {
    #[serde(flatten)]
    pub entry: MirrorEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u128>,
}

#[derive(Debug, Default)]
pub struct MirrorCatalog {
    entries: HashMap<MirrorKind, Vec<MirrorEntry>>,
    defaults: HashMap<MirrorKind, String>,
    latency: RwLock<HashMap<(MirrorKind, String), Duration>>,
}

impl MirrorCatalog {
    /// Empty catalog; the first entry inserted per kind becomes its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the project's built-in mirrors.
    pub fn with_defaults() -> Self {
        const TOOLCHAIN_FILE: &str = "python-3.12.0-embed-amd64.zip";
        const REPO: &str = "https://github.com/DLmaster361/AUTO_MAA.git";

        let mut catalog = Self::new();

        for (key, name, base) in [
            ("official", "Python official", "https://www.python.org/ftp/python/3.12.0/"),
            ("tsinghua", "Tsinghua TUNA", "https://mirrors.tuna.tsinghua.edu.cn/python/3.12.0/"),
            ("ustc", "USTC", "https://mirrors.ustc.edu.cn/python/3.12.0/"),
            ("huawei", "Huawei Cloud", "https://mirrors.huaweicloud.com/repository/toolkit/python/3.12.0/"),
            ("aliyun", "Aliyun", "https://mirrors.aliyun.com/python-release/windows/"),
        ] {
            catalog.insert(
                MirrorKind::Toolchain,
                MirrorEntry::new(key, name, format!("{}{}", base, TOOLCHAIN_FILE)),
            );
        }
        catalog.set_default(MirrorKind::Toolchain, "ustc");

        catalog.insert(
            MirrorKind::Vcs,
            MirrorEntry::new("project", "Project download site", "http://221.236.27.82:10197/d/AUTO_MAA/git.zip"),
        );

        for (key, name, url) in [
            ("official", "PyPI official", "https://pypi.org/simple/"),
            ("tsinghua", "Tsinghua", "https://pypi.tuna.tsinghua.edu.cn/simple/"),
            ("ustc", "USTC", "https://pypi.mirrors.ustc.edu.cn/simple/"),
            ("aliyun", "Aliyun", "https://mirrors.aliyun.com/pypi/simple/"),
            ("douban", "Douban", "https://pypi.douban.com/simple/"),
        ] {
            catalog.insert(MirrorKind::PackageIndex, MirrorEntry::new(key, name, url));
        }
        catalog.set_default(MirrorKind::PackageIndex, "tsinghua");

        catalog.insert(MirrorKind::Repository, MirrorEntry::new("github", "GitHub", REPO));
        for (key, name, proxy) in [
            ("ghfast", "ghfast", "https://ghfast.top/"),
            ("ghproxy_cloudflare", "gh-proxy (Cloudflare)", "https://gh-proxy.com/"),
            ("ghproxy_hongkong", "gh-proxy (Hong Kong)", "https://hk.gh-proxy.com/"),
            ("ghproxy_fastly", "gh-proxy (Fastly CDN)", "https://cdn.gh-proxy.com/"),
            ("ghproxy_edgeone", "gh-proxy (EdgeOne)", "https://edgeone.gh-proxy.com/"),
        ] {
            catalog.insert(
                MirrorKind::Repository,
                MirrorEntry::new(key, name, format!("{}{}", proxy, REPO)),
            );
        }

        catalog
    }

    pub fn insert(&mut self, kind: MirrorKind, entry: MirrorEntry) {
        self.defaults.entry(kind).or_insert_with(|| entry.key.clone());
        self.entries.entry(kind).or_default().push(entry);
    }

    pub fn with_entry(mut self, kind: MirrorKind, entry: MirrorEntry) -> Self {
        self.insert(kind, entry);
        self
    }

    /// Designate the default entry for a kind. Unknown keys are ignored.
    pub fn set_default(&mut self, kind: MirrorKind, key: &str) {
        if self.find(kind, key).is_some() {
            self.defaults.insert(kind, key.to_string());
        }
    }

    pub fn entries(&self, kind: MirrorKind) -> &[MirrorEntry] {
        self.entries.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, kind: MirrorKind, key: &str) -> Option<&MirrorEntry> {
        self.entries(kind).iter().find(|e| e.key == key)
    }

    pub fn default_entry(&self, kind: MirrorKind) -> Option<&MirrorEntry> {
        self.defaults
            .get(&kind)
            .and_then(|key| self.find(kind, key))
            .or_else(|| self.entries(kind).first())
    }

    /// Entry for `key`, or the kind's default when the key is absent or unknown.
    pub fn resolve(&self, kind: MirrorKind, key: Option<&str>) -> Option<&MirrorEntry> {
        match key.and_then(|k| self.find(kind, k)) {
            Some(entry) => Some(entry),
            None => {
                if let Some(k) = key {
                    tracing::warn!("Unknown {} mirror '{}', using default", kind, k);
                }
                self.default_entry(kind)
            }
        }
    }

    /// Like [`resolve`](Self::resolve) but accepts a literal URL in place of a key.
    pub fn resolve_url(&self, kind: MirrorKind, key_or_url: Option<&str>) -> Option<String> {
        match key_or_url {
            Some(v) if v.contains("://") || v.starts_with("git@") => Some(v.to_string()),
            other => self.resolve(kind, other).map(|e| e.url.clone()),
        }
    }

    pub fn record_latency(&self, kind: MirrorKind, key: &str, latency: Duration) {
        if let Ok(mut table) = self.latency.write() {
            table.insert((kind, key.to_string()), latency);
        }
    }

    pub fn latency(&self, kind: MirrorKind, key: &str) -> Option<Duration> {
        self.latency
            .read()
            .ok()
            .and_then(|table| table.get(&(kind, key.to_string())).copied())
    }

    /// Entries sorted by measured latency; unmeasured entries keep catalog order at the end.
    pub fn ranked(&self, kind: MirrorKind) -> Vec<RankedMirror> {
        let mut ranked: Vec<RankedMirror> = self
            .entries(kind)
            .iter()
            .map(|entry| RankedMirror {
                latency_ms: self.latency(kind, &entry.key).map(|d| d.as_millis()),
                entry: entry.clone(),
            })
            .collect();
        ranked.sort_by_key(|m| m.latency_ms.unwrap_or(u128::MAX));
        ranked
    }

    /// Probe every mirror of a kind with a HEAD request and record the round trip.
    ///
    /// Failed or timed-out probes record nothing, so those mirrors sort last.
    pub async fn measure(&self, client: &reqwest::Client, kind: MirrorKind, timeout: Duration) -> Vec<RankedMirror> {
        let probes = self.entries(kind).iter().map(|entry| async move {
            let started = Instant::now();
            let result = client.head(&entry.url).timeout(timeout).send().await;
            match result {
                Ok(resp) if resp.status().is_success() || resp.status().is_redirection() => {
                    Some((entry.key.clone(), started.elapsed()))
                }
                Ok(resp) => {
                    tracing::debug!("Mirror {} answered {}", entry.key, resp.status());
                    None
                }
                Err(e) => {
                    tracing::debug!("Mirror {} unreachable: {}", entry.key, e);
                    None
                }
            }
        });

        for (key, latency) in futures::future::join_all(probes).await.into_iter().flatten() {
            self.record_latency(kind, &key, latency);
        }

        self.ranked(kind)
    }
}
