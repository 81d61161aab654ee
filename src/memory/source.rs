//! Memory sources supplying backing files and their page sizes

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TurboqError};
use crate::memory::file::QueueFile;

const PAGE_SIZE_2M: usize = 2 * 1024 * 1024;
const PAGE_SIZE_1G: usize = 1024 * 1024 * 1024;

/// How a memory source should treat a missing backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlags {
    /// Fail when the backing file does not exist
    OpenOnly,
    /// Create the backing file when it does not exist
    OpenOrCreate,
}

/// Huge pages selector for [`DefaultMemorySource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HugePagesOption {
    /// Prefer 1 GiB, fall back to 2 MiB, then to regular pages
    Auto,
    /// Require a 2 MiB hugetlbfs mount
    HugePages2M,
    /// Require a 1 GiB hugetlbfs mount
    HugePages1G,
    /// Regular pages from a tmpfs mount
    None,
}

/// Supplier of queue backing files.
///
/// The queue factories are generic over this one seam only; everything past
/// it is monomorphic.
pub trait MemorySource {
    /// Open (or create, per `flags`) the backing file for `name` and report
    /// the page size region capacities must be rounded to.
    fn open(&self, name: &str, flags: OpenFlags) -> Result<(QueueFile, usize)>;
}

/// File-backed memory source rooted at a tmpfs or hugetlbfs mount point.
#[derive(Debug, Clone)]
pub struct DefaultMemorySource {
    path: PathBuf,
    page_size: usize,
}

impl DefaultMemorySource {
    /// Memory source on the default tmpfs mount (`/dev/shm`, else `/tmp`).
    pub fn new() -> Result<Self> {
        Self::with_huge_pages(HugePagesOption::None)
    }

    /// Memory source honoring a huge-pages preference.
    pub fn with_huge_pages(option: HugePagesOption) -> Result<Self> {
        let mounts = read_proc_mounts()?;
        let mount = match option {
            HugePagesOption::Auto => auto_mount(&mounts),
            HugePagesOption::HugePages2M => mount_with_page_size(&mounts, PAGE_SIZE_2M),
            HugePagesOption::HugePages1G => mount_with_page_size(&mounts, PAGE_SIZE_1G),
            HugePagesOption::None => default_mount(&mounts),
        }?;

        Ok(Self {
            path: mount.path.clone(),
            page_size: mount.page_size,
        })
    }

    /// Memory source on an explicit directory with an explicit page size.
    pub fn with_path(path: impl Into<PathBuf>, page_size: usize) -> Result<Self> {
        let path = path.into();
        if !path.is_dir() {
            return Err(TurboqError::invalid_parameter(
                "path",
                "directory does not exist",
            ));
        }
        if !page_size.is_power_of_two() {
            return Err(TurboqError::invalid_parameter(
                "page_size",
                "page size must be a power of two",
            ));
        }
        Ok(Self { path, page_size })
    }

    /// Directory backing files are created in.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page size capacities are rounded to.
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

impl MemorySource for DefaultMemorySource {
    fn open(&self, name: &str, flags: OpenFlags) -> Result<(QueueFile, usize)> {
        let file_path = self.path.join(name);
        let file = match flags {
            OpenFlags::OpenOnly => QueueFile::open(&file_path)?,
            OpenFlags::OpenOrCreate => QueueFile::open_or_create(&file_path, 0o644)?,
        };
        Ok((file, self.page_size))
    }
}

/// Anonymous memory source backed by `memfd` regions.
///
/// Every `open` mints a fresh unnamed region, so queues built on it are
/// reachable only through endpoints of the same process. Intended for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousMemorySource;

impl MemorySource for AnonymousMemorySource {
    fn open(&self, name: &str, _flags: OpenFlags) -> Result<(QueueFile, usize)> {
        Ok((QueueFile::anonymous(name)?, default_page_size()))
    }
}

fn default_page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

#[derive(Debug, Clone)]
struct MountPoint {
    path: PathBuf,
    page_size: usize,
}

fn read_proc_mounts() -> Result<Vec<MountPoint>> {
    let contents = fs::read_to_string("/proc/mounts")
        .map_err(|e| TurboqError::from_io(e, "failed to read /proc/mounts"))?;
    let default_huge = fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|meminfo| parse_huge_page_size(&meminfo));
    Ok(parse_mounts(&contents, default_page_size(), default_huge))
}

fn parse_mounts(contents: &str, page_size: usize, default_huge: Option<usize>) -> Vec<MountPoint> {
    let mut entries = Vec::new();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (fsname, dir, _fstype, opts) =
            match (fields.next(), fields.next(), fields.next(), fields.next()) {
                (Some(a), Some(b), Some(c), Some(d)) => (a, b, c, d),
                _ => continue,
            };

        match fsname {
            "tmpfs" => entries.push(MountPoint {
                path: PathBuf::from(dir),
                page_size,
            }),
            "hugetlbfs" => {
                // pagesize= mount option wins; otherwise the kernel default.
                if let Some(page_size) = page_size_from_mount_opts(opts).or(default_huge) {
                    entries.push(MountPoint {
                        path: PathBuf::from(dir),
                        page_size,
                    });
                }
            }
            _ => {}
        }
    }
    entries
}

fn page_size_from_mount_opts(opts: &str) -> Option<usize> {
    for option in opts.split(',') {
        if let Some(value) = option.strip_prefix("pagesize=") {
            return match value {
                "2M" => Some(PAGE_SIZE_2M),
                "1G" => Some(PAGE_SIZE_1G),
                _ => None,
            };
        }
    }
    None
}

fn parse_huge_page_size(meminfo: &str) -> Option<usize> {
    meminfo.lines().find_map(|line| {
        let value = line.strip_prefix("Hugepagesize:")?;
        let kib = value.trim().strip_suffix("kB")?.trim();
        kib.parse::<usize>().ok().map(|kib| kib * 1024)
    })
}

fn default_mount(mounts: &[MountPoint]) -> Result<&MountPoint> {
    mounts
        .iter()
        .find(|entry| entry.path == Path::new("/dev/shm"))
        .or_else(|| mounts.iter().find(|entry| entry.path == Path::new("/tmp")))
        .ok_or_else(|| TurboqError::platform("no tmpfs mount point found"))
}

fn mount_with_page_size(mounts: &[MountPoint], page_size: usize) -> Result<&MountPoint> {
    mounts
        .iter()
        .find(|entry| entry.page_size == page_size)
        .ok_or_else(|| {
            TurboqError::platform(format!(
                "no hugetlbfs mount point with page size {}",
                page_size
            ))
        })
}

fn auto_mount(mounts: &[MountPoint]) -> Result<&MountPoint> {
    mount_with_page_size(mounts, PAGE_SIZE_1G)
        .or_else(|_| mount_with_page_size(mounts, PAGE_SIZE_2M))
        .or_else(|_| default_mount(mounts))
}
