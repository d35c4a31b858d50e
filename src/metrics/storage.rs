//! Storage capacity of the first fixed local volume, cached for one TTL window.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::cache::TtlCache;
use crate::error::SourceUnavailableError;

const PROC_MOUNTS: &str = "/proc/mounts";
const SYS_CLASS_BLOCK: &str = "/sys/class/block";
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

const NETWORK_FS_TYPES: &[&str] = &[
    "nfs",
    "nfs4",
    "cifs",
    "smb3",
    "smbfs",
    "ceph",
    "glusterfs",
    "sshfs",
    "fuse.sshfs",
    "9p",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeKind {
    /// Local block device that stays attached
    Fixed,
    /// Local block device flagged removable by the kernel (USB sticks, SD cards)
    Removable,
    /// Remote filesystem
    Network,
    /// Pseudo or memory-backed filesystem (proc, tmpfs, overlay, loop images)
    Virtual,
}

/// A mounted volume and its capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    /// Mount point, used as the volume identifier
    pub name: String,
    pub kind: VolumeKind,
    /// Whether the capacity could be queried
    pub ready: bool,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Mounted volumes in mount order. Capacity may be probed as the
/// iterator advances.
pub type Volumes<'a> = Box<dyn Iterator<Item = Volume> + 'a>;

/// Enumerates mounted volumes.
pub trait VolumeSource: Send + Sync {
    fn volumes(&self) -> Result<Volumes<'_>, SourceUnavailableError>;
}

type CapacityProbe = fn(&Path) -> Option<(u64, u64)>;

/// Volume enumeration from /proc/mounts, probing capacity with statvfs.
#[derive(Debug, Clone)]
pub struct MountTable {
    mounts_path: PathBuf,
    sys_block: PathBuf,
    probe: CapacityProbe,
}

impl MountTable {
    pub fn new() -> Self {
        Self {
            mounts_path: PathBuf::from(PROC_MOUNTS),
            sys_block: PathBuf::from(SYS_CLASS_BLOCK),
            probe: statvfs_capacity,
        }
    }

    fn classify(&self, entry: &MountEntry) -> VolumeKind {
        if NETWORK_FS_TYPES.contains(&entry.fs_type.as_str()) {
            return VolumeKind::Network;
        }

        let Some(device_name) = entry.device.strip_prefix("/dev/") else {
            return VolumeKind::Virtual;
        };

        if device_name.starts_with("loop") || device_name.starts_with("ram") {
            return VolumeKind::Virtual;
        }

        if is_removable(&self.sys_block, device_name) {
            VolumeKind::Removable
        } else {
            VolumeKind::Fixed
        }
    }
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeSource for MountTable {
    fn volumes(&self) -> Result<Volumes<'_>, SourceUnavailableError> {
        let content =
            fs::read_to_string(&self.mounts_path).map_err(|source| SourceUnavailableError::Io {
                path: self.mounts_path.display().to_string(),
                source,
            })?;

        let volumes = parse_mounts(&content)
            .into_iter()
            .map(move |entry| {
                let kind = self.classify(&entry);
                // statvfs on a dead network mount blocks, so only local
                // devices are probed.
                let capacity = match kind {
                    VolumeKind::Fixed | VolumeKind::Removable => {
                        (self.probe)(Path::new(&entry.mount_point))
                    }
                    VolumeKind::Network | VolumeKind::Virtual => None,
                };
                let (total_bytes, available_bytes) = capacity.unwrap_or((0, 0));

                Volume {
                    name: entry.mount_point,
                    kind,
                    ready: capacity.is_some(),
                    total_bytes,
                    available_bytes,
                }
            });

        Ok(Box::new(volumes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MountEntry {
    device: String,
    mount_point: String,
    fs_type: String,
}

fn parse_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            Some(MountEntry {
                device: parts.next()?.to_string(),
                mount_point: unescape_mount_field(parts.next()?),
                fs_type: parts.next()?.to_string(),
            })
        })
        .collect()
}

/// Decode the `\ooo` octal escapes the kernel uses for whitespace and
/// backslashes in /proc/mounts fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            decoded.push(value);
            i += 4;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

fn is_removable(sys_block: &Path, device_name: &str) -> bool {
    let Ok(mut dir) = fs::canonicalize(sys_block.join(device_name)) else {
        return false;
    };

    // Partitions carry the flag on their parent disk.
    if dir.join("partition").exists() {
        if let Some(parent) = dir.parent() {
            dir = parent.to_path_buf();
        }
    }

    fs::read_to_string(dir.join("removable"))
        .map(|flag| flag.trim() == "1")
        .unwrap_or(false)
}

/// Total and available bytes of the filesystem mounted at `path`.
fn statvfs_capacity(path: &Path) -> Option<(u64, u64)> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::mem::MaybeUninit;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
        let mut statvfs = MaybeUninit::<libc::statvfs>::uninit();

        let result = unsafe { libc::statvfs(c_path.as_ptr(), statvfs.as_mut_ptr()) };
        if result != 0 {
            return None;
        }

        let statvfs = unsafe { statvfs.assume_init() };
        let block_size = statvfs.f_frsize as u64;
        let total_bytes = statvfs.f_blocks as u64 * block_size;
        let available_bytes = statvfs.f_bavail as u64 * block_size;

        Some((total_bytes, available_bytes.min(total_bytes)))
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        None
    }
}

/// Capacity of the selected volume in GB.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StorageInfo {
    pub total_gb: f64,
    pub available_gb: f64,
}

impl From<&Volume> for StorageInfo {
    fn from(volume: &Volume) -> Self {
        Self {
            total_gb: volume.total_bytes as f64 / BYTES_PER_GB,
            available_gb: volume.available_bytes as f64 / BYTES_PER_GB,
        }
    }
}

/// Storage reader: first ready fixed volume matching an optional
/// mount point prefix.
pub struct StorageReader {
    source: Arc<dyn VolumeSource>,
    filter: Option<String>,
    cache: TtlCache<StorageInfo>,
}

impl StorageReader {
    /// An empty `filter` is the same as none.
    pub fn new(
        source: Arc<dyn VolumeSource>,
        filter: Option<String>,
        cache: TtlCache<StorageInfo>,
    ) -> Self {
        Self {
            source,
            filter: filter
                .filter(|prefix| !prefix.is_empty())
                .map(|prefix| prefix.to_lowercase()),
            cache,
        }
    }

    /// Storage capacity. On any fault the previous value is returned
    /// unchanged (zeros before the first successful read).
    pub fn read(&self) -> StorageInfo {
        if let Some(info) = self.cache.fresh() {
            trace!("Storage info served from cache: {info:?}");
            return info;
        }

        match self.try_read() {
            Ok(info) => {
                debug!(
                    "Storage: {:.2} GB available of {:.2} GB",
                    info.available_gb, info.total_gb
                );
                self.cache.store(info);
                info
            }
            Err(error) => {
                warn!("Failed to fetch storage info: {error}");
                self.cache.last()
            }
        }
    }

    fn try_read(&self) -> Result<StorageInfo, SourceUnavailableError> {
        self.source
            .volumes()?
            .find(|volume| {
                volume.kind == VolumeKind::Fixed && volume.ready && self.matches(&volume.name)
            })
            .map(|volume| StorageInfo::from(&volume))
            .ok_or_else(|| SourceUnavailableError::NotFound(self.filter.clone()))
    }

    fn matches(&self, name: &str) -> bool {
        match &self.filter {
            Some(prefix) => name.to_lowercase().starts_with(prefix.as_str()),
            None => true,
        }
    }
}
