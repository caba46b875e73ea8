//! Reading the live mount table of the calling process.
//!
//! Each line of `/proc/self/mountinfo` looks like
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt/parent\040dir rw,noatime master:1 - ext3 /dev/root rw,errors=continue
//! ```
//!
//! The fifth field is the mount point and the sixth field holds the per-mount options. The kernel
//! escapes space, tab, newline and backslash in paths as three digit octal sequences.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use nix::mount::MsFlags;

use crate::EncapsulateError;

pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

const MOUNT_POINT_FIELD: usize = 4;

const MOUNT_OPTIONS_FIELD: usize = 5;

/// One active mount point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
  mount_point: PathBuf,
  options: Vec<String>,
}

impl MountEntry {
  pub fn mount_point(&self) -> &Path {
    &self.mount_point
  }

  pub fn options(&self) -> &Vec<String> {
    &self.options
  }

  /// Per-mount flags that must survive a bind remount
  pub fn preserved_flags(&self) -> MsFlags {
    let mut flags = MsFlags::empty();
    for option in self.options.iter() {
      flags |= match option.as_str() {
        "nosuid" => MsFlags::MS_NOSUID,
        "nodev" => MsFlags::MS_NODEV,
        "noexec" => MsFlags::MS_NOEXEC,
        "noatime" => MsFlags::MS_NOATIME,
        "nodiratime" => MsFlags::MS_NODIRATIME,
        "relatime" => MsFlags::MS_RELATIME,
        "strictatime" => MsFlags::MS_STRICTATIME,
        _ => MsFlags::empty(),
      };
    }
    flags
  }
}

/// Read and parse the mount table of the current process
pub fn mount_table() -> Result<Vec<MountEntry>, EncapsulateError> {
  let content = fs::read(MOUNTINFO_PATH).map_err(|err| {
    EncapsulateError::mount(format!("Can not read {}: {}", MOUNTINFO_PATH, err))
  })?;
  parse_mount_table(&content)
}

pub fn parse_mount_table(content: &[u8]) -> Result<Vec<MountEntry>, EncapsulateError> {
  let mut entries = vec![];
  for line in content.split(|b| *b == b'\n') {
    if line.is_empty() {
      continue;
    }
    let fields = line
      .split(|b| *b == b' ')
      .filter(|f| !f.is_empty())
      .collect::<Vec<&[u8]>>();
    if fields.len() <= MOUNT_OPTIONS_FIELD {
      return Err(EncapsulateError::mount(format!(
        "Malformed mount table line: {}",
        String::from_utf8_lossy(line)
      )));
    }
    let mount_point = PathBuf::from(OsString::from_vec(unescape(fields[MOUNT_POINT_FIELD])));
    let options = String::from_utf8_lossy(fields[MOUNT_OPTIONS_FIELD])
      .split(',')
      .map(|o| o.to_string())
      .collect();
    entries.push(MountEntry {
      mount_point,
      options,
    });
  }
  Ok(entries)
}

/// Mount points at or below `root`, in mount table order
pub fn mounts_under<'a>(entries: &'a [MountEntry], root: &Path) -> Vec<&'a MountEntry> {
  entries
    .iter()
    .filter(|entry| entry.mount_point.starts_with(root))
    .collect()
}

/// Decode `\ooo` octal escapes, leaving anything else untouched
fn unescape(raw: &[u8]) -> Vec<u8> {
  let mut result = Vec::with_capacity(raw.len());
  let mut i = 0;
  while i < raw.len() {
    if raw[i] == b'\\' && i + 3 < raw.len() && is_octal_escape(&raw[i + 1..i + 4]) {
      let digits = &raw[i + 1..i + 4];
      let code = digits
        .iter()
        .fold(0u32, |acc, d| acc * 8 + (d - b'0') as u32);
      result.push(code as u8);
      i += 4;
    } else {
      result.push(raw[i]);
      i += 1;
    }
  }
  result
}

fn is_octal_escape(digits: &[u8]) -> bool {
  digits.len() == 3
    && digits.iter().all(|d| (b'0'..=b'7').contains(d))
    && (digits[0] - b'0') <= 3
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &[u8] = b"\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
23 22 0:21 / /proc rw,nosuid,nodev,noexec,relatime shared:12 - proc proc rw
24 22 0:5 / /dev rw,nosuid shared:2 - devtmpfs udev rw,size=4008384k
40 22 0:35 / /tmp rw,nosuid,nodev shared:20 - tmpfs tmpfs rw
90 40 8:1 / /tmp/encapsulate.ab12 rw,relatime - ext4 /dev/sda1 rw
91 90 0:21 / /tmp/encapsulate.ab12/proc rw,nosuid,nodev,noexec,relatime - proc proc rw
92 90 8:2 / /tmp/encapsulate.ab12/media/usb\\040stick rw,noatime - vfat /dev/sdb1 rw
93 40 8:1 / /tmp/encapsulate.ab123 rw,relatime - ext4 /dev/sda1 rw
";

  #[test]
  fn it_should_parse_mount_points_and_options() {
    let entries = parse_mount_table(SAMPLE).unwrap();
    assert_eq!(entries.len(), 8);
    assert_eq!(entries[0].mount_point(), Path::new("/"));
    assert_eq!(entries[1].mount_point(), Path::new("/proc"));
    assert_eq!(
      entries[1].options(),
      &vec!["rw", "nosuid", "nodev", "noexec", "relatime"]
    );
  }

  #[test]
  fn it_should_decode_escaped_whitespace() {
    let entries = parse_mount_table(SAMPLE).unwrap();
    assert_eq!(
      entries[6].mount_point(),
      Path::new("/tmp/encapsulate.ab12/media/usb stick")
    );
  }

  #[test]
  fn it_should_decode_all_kernel_escapes() {
    assert_eq!(unescape(b"a\\040b\\011c\\012d\\134e"), b"a b\tc\nd\\e".to_vec());
  }

  #[test]
  fn it_should_keep_incomplete_escapes() {
    assert_eq!(unescape(b"dir\\04"), b"dir\\04".to_vec());
    assert_eq!(unescape(b"dir\\9xy"), b"dir\\9xy".to_vec());
    assert_eq!(unescape(b"trailing\\"), b"trailing\\".to_vec());
  }

  #[test]
  fn it_should_select_mounts_by_path_component() {
    let entries = parse_mount_table(SAMPLE).unwrap();
    let root = Path::new("/tmp/encapsulate.ab12");
    let selected = mounts_under(&entries, root)
      .into_iter()
      .map(|e| e.mount_point().to_path_buf())
      .collect::<Vec<_>>();
    assert_eq!(
      selected,
      vec![
        PathBuf::from("/tmp/encapsulate.ab12"),
        PathBuf::from("/tmp/encapsulate.ab12/proc"),
        PathBuf::from("/tmp/encapsulate.ab12/media/usb stick"),
      ]
    );
  }

  #[test]
  fn it_should_preserve_restrictive_flags() {
    let entries = parse_mount_table(SAMPLE).unwrap();
    let flags = entries[5].preserved_flags();
    assert!(flags.contains(MsFlags::MS_NOSUID));
    assert!(flags.contains(MsFlags::MS_NODEV));
    assert!(flags.contains(MsFlags::MS_NOEXEC));
    assert!(flags.contains(MsFlags::MS_RELATIME));
    assert!(!flags.contains(MsFlags::MS_RDONLY));
    assert_eq!(entries[4].preserved_flags(), MsFlags::MS_RELATIME);
  }

  #[test]
  fn it_should_reject_truncated_lines() {
    assert!(parse_mount_table(b"22 1 8:1 / /\n").is_err());
  }
}
