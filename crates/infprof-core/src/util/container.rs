//! Container environment detection and identity.
//!
//! `is_container` decides whether the profiler runs inside a container
//! (Docker, Kubernetes, Podman, LXC); `container_id` derives the short
//! container id reported in static info.

use std::path::Path;

use crate::collector::probe::read_string;
use crate::collector::traits::FileSystem;

/// Length of the short container id (as printed by `docker ps`).
pub const SHORT_ID_LEN: usize = 12;

/// Reported when no container identity can be derived.
pub const UNAVAILABLE: &str = "unavailable";

/// Marker files dropped by Docker and Podman at the container root.
const RUNTIME_MARKERS: [&str; 2] = ["/.dockerenv", "/run/.containerenv"];

/// Returns `true` if the current process is running inside a container.
pub fn is_container<F: FileSystem + ?Sized>(fs: &F, proc_path: &Path) -> bool {
    if RUNTIME_MARKERS.iter().any(|m| fs.exists(Path::new(m))) {
        return true;
    }
    let (init_cgroup, _) = read_string(fs, &proc_path.join("1/cgroup"));
    cgroup_mentions_runtime(&init_cgroup)
}

fn cgroup_mentions_runtime(content: &str) -> bool {
    ["kubepods", "docker", "containerd", "lxc", "libpod"]
        .iter()
        .any(|p| content.contains(p))
}

/// Derives the short container id.
///
/// Looks for a `/docker/<id>` or `/kubepods/.../<id>` segment in
/// `/proc/self/cgroup` first, then accepts a hostname that looks like a
/// container id, otherwise returns `"unavailable"`.
pub fn container_id<F: FileSystem + ?Sized>(fs: &F, proc_path: &Path) -> String {
    let (cgroup, _) = read_string(fs, &proc_path.join("self/cgroup"));
    if let Some(id) = container_id_from_cgroup(&cgroup) {
        return id;
    }

    let (hostname, _) = read_string(fs, &proc_path.join("sys/kernel/hostname"));
    let hostname = hostname.trim();
    if looks_like_container_id(hostname) {
        return short_id(hostname);
    }

    UNAVAILABLE.to_string()
}

/// Extracts the container id from `/proc/self/cgroup` content.
pub fn container_id_from_cgroup(content: &str) -> Option<String> {
    for line in content.lines() {
        // hierarchy-id:controllers:path
        let Some(path) = line.splitn(3, ':').nth(2) else {
            continue;
        };
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if let Some(pos) = segments.iter().position(|s| *s == "docker")
            && let Some(id) = segments.get(pos + 1)
        {
            return Some(short_id(id));
        }

        if segments.iter().any(|s| s.starts_with("kubepods"))
            && let Some(last) = segments.last()
        {
            let id = strip_runtime_decoration(last);
            if looks_like_container_id(id) {
                return Some(short_id(id));
            }
        }

        if let Some(last) = segments.last()
            && last.starts_with("docker-")
        {
            return Some(short_id(strip_runtime_decoration(last)));
        }
    }
    None
}

/// Strips systemd driver decoration: `docker-<id>.scope`, `cri-containerd-<id>.scope`.
fn strip_runtime_decoration(segment: &str) -> &str {
    let s = segment.strip_suffix(".scope").unwrap_or(segment);
    s.rsplit('-').next().unwrap_or(s)
}

/// At least 12 lowercase hex characters.
pub fn looks_like_container_id(s: &str) -> bool {
    s.len() >= SHORT_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn short_id(id: &str) -> String {
    id.chars().take(SHORT_ID_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    #[test]
    fn test_docker_v1_path() {
        let content = "4:cpu,cpuacct:/docker/0123456789abcdef0123456789abcdef\n";
        assert_eq!(
            container_id_from_cgroup(content).as_deref(),
            Some("0123456789ab")
        );
    }

    #[test]
    fn test_kubepods_path() {
        let content = "0::/kubepods/burstable/pod1f2e3d4c/cri-containerd-fedcba9876543210fedcba.scope\n";
        assert_eq!(
            container_id_from_cgroup(content).as_deref(),
            Some("fedcba987654")
        );

        let content = "11:memory:/kubepods/besteffort/pod1234/abcdefabcdef0011\n";
        assert_eq!(
            container_id_from_cgroup(content).as_deref(),
            Some("abcdefabcdef")
        );
    }

    #[test]
    fn test_systemd_docker_scope() {
        let content = "0::/system.slice/docker-aabbccddeeff00112233.scope\n";
        assert_eq!(
            container_id_from_cgroup(content).as_deref(),
            Some("aabbccddeeff")
        );
    }

    #[test]
    fn test_host_cgroup_has_no_id() {
        assert_eq!(
            container_id_from_cgroup("0::/user.slice/user-1000.slice/session-2.scope\n"),
            None
        );
    }

    #[test]
    fn test_hostname_fallback_and_unavailable() {
        let fs = MockFs::cgroup_v2_container();
        assert_eq!(container_id(&fs, Path::new("/proc")), "3f4e5d6c7b8a");

        let fs = MockFs::typical_system();
        assert_eq!(container_id(&fs, Path::new("/proc")), UNAVAILABLE);
    }

    #[test]
    fn test_looks_like_container_id() {
        assert!(looks_like_container_id("3f4e5d6c7b8a"));
        assert!(!looks_like_container_id("gpu-node-1"));
        assert!(!looks_like_container_id("abc"));
    }

    #[test]
    fn test_is_container_detection() {
        let proc = Path::new("/proc");
        assert!(!is_container(&MockFs::typical_system(), proc));
        // marker file
        assert!(is_container(&MockFs::cgroup_v2_container(), proc));
        // init process in a docker cgroup
        assert!(is_container(&MockFs::cgroup_v1_container(), proc));

        let mut fs = MockFs::typical_system();
        fs.add_file("/run/.containerenv", "engine=\"podman-4.9.3\"\n");
        assert!(is_container(&fs, proc));
    }
}
