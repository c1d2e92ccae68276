//! Mount table lookups from `/proc/mounts` and `/proc/self/mountinfo`

/// Propagation type of a mount point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MountPropagation {
    Shared,
    Slave,
    Private,
}

/// First mount point whose filesystem type is `fs_type` (e.g. `bpf`, `cgroup2`)
pub fn find_mount_path(mounts: &str, fs_type: &str) -> Option<String> {
    mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let _device = fields.next()?;
        let mount_point = fields.next()?;
        let kind = fields.next()?;
        (kind == fs_type).then(|| unescape(mount_point))
    })
}

/// Propagation of the mount that contains `path`.
///
/// The longest mount point that is a prefix of `path` wins, so a path below a
/// mount inherits that mount's propagation. Returns `None` when no entry
/// covers `path`.
pub fn find_mount_propagation(mountinfo: &str, path: &str) -> Option<MountPropagation> {
    let mut best: Option<(usize, MountPropagation)> = None;

    for line in mountinfo.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 7 {
            continue;
        }
        let mount_point = unescape(fields[4]);
        if !covers(&mount_point, path) {
            continue;
        }

        // Optional fields sit between field 6 and the "-" separator
        let optional = fields[6..].iter().take_while(|field| **field != "-");
        let mut propagation = MountPropagation::Private;
        for field in optional {
            if field.starts_with("shared:") {
                propagation = MountPropagation::Shared;
                break;
            }
            if field.starts_with("master:") {
                propagation = MountPropagation::Slave;
            }
        }

        // Later entries for the same mount point stack on top of earlier ones
        if best.map_or(true, |(len, _)| mount_point.len() >= len) {
            best = Some((mount_point.len(), propagation));
        }
    }

    best.map(|(_, propagation)| propagation)
}

fn covers(mount_point: &str, path: &str) -> bool {
    if mount_point == "/" || mount_point == path {
        return true;
    }
    path.strip_prefix(mount_point)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Undo the octal escaping the kernel applies to spaces and tabs
fn unescape(field: &str) -> String {
    field
        .replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}
