use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::Pid;

use crate::sys::Error;

/// Maximum length of `/proc/<pid>/comm`.
const COMM_MAX_LEN: usize = 15;

/// Returns the ID of the first process whose name starts with `name`.
pub fn find_process_by_name(name: &str) -> crate::Result<u64> {
    let entries = fs::read_dir("/proc").map_err(|e| Error::File(PathBuf::from("/proc"), e))?;

    let mut found: Option<u64> = None;

    for entry in entries.filter_map(Result::ok) {
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };

        // the process may have exited since
        let Ok(comm) = fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };

        if comm_matches(comm.trim_end(), name) {
            found = Some(found.map_or(pid, |found| found.min(pid)));
        }
    }

    found.ok_or_else(|| crate::Error::ProcessNotFound(name.to_owned()))
}

fn comm_matches(comm: &str, name: &str) -> bool {
    comm.starts_with(name) || (comm.len() == COMM_MAX_LEN && name.starts_with(comm))
}

/// Returns the IDs of every thread of the given process.
pub fn thread_ids(pid: Pid) -> crate::sys::Result<Vec<Pid>> {
    let path = PathBuf::from(format!("/proc/{pid}/task"));

    let mut tids: Vec<Pid> = fs::read_dir(&path)
        .map_err(|e| Error::File(path, e))?
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .map(Pid::from_raw)
        .collect();

    // main thread first
    tids.sort_by_key(|tid| (*tid != pid, tid.as_raw()));

    Ok(tids)
}

/// Returns the address at which the executable of the given process is
/// mapped.
pub fn image_base(pid: Pid) -> crate::sys::Result<u64> {
    let exe_path = PathBuf::from(format!("/proc/{pid}/exe"));
    let exe = fs::read_link(&exe_path).map_err(|e| Error::File(exe_path, e))?;

    let maps_path = PathBuf::from(format!("/proc/{pid}/maps"));
    let maps = fs::read_to_string(&maps_path).map_err(|e| Error::File(maps_path, e))?;

    lowest_mapping_of(&maps, &exe).ok_or(Error::MissingExeMapping(exe))
}

fn lowest_mapping_of(maps: &str, path: &Path) -> Option<u64> {
    maps.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();

            let range = fields.next()?;
            let mapped_path = fields.skip(4).collect::<Vec<_>>().join(" ");

            if Path::new(&mapped_path) != path {
                return None;
            }

            let start = range.split('-').next()?;
            u64::from_str_radix(start, 16).ok()
        })
        .min()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{comm_matches, lowest_mapping_of};

    const MAPS: &str = "\
56d0c000-56d0d000 r--p 00001000 08:01 1048602                            /opt/talos/Talos
56d0b000-56d0c000 r--p 00000000 08:01 1048602                            /opt/talos/Talos
56d0d000-56d0e000 r-xp 00002000 08:01 1048602                            /opt/talos/Talos
57a21000-57a42000 rw-p 00000000 00:00 0                                  [heap]
f7d5a000-f7d7a000 r--p 00000000 08:01 1051213                            /usr/lib32/libc.so.6
ffb3e000-ffb5f000 rw-p 00000000 00:00 0                                  [stack]
";

    #[test]
    fn exe_lowest_mapping() {
        assert_eq!(
            lowest_mapping_of(MAPS, Path::new("/opt/talos/Talos")),
            Some(0x56d0_b000)
        );
    }

    #[test]
    fn exe_not_mapped() {
        assert_eq!(lowest_mapping_of(MAPS, Path::new("/opt/talos/Other")), None);
    }

    #[test]
    fn path_with_spaces() {
        let maps = "08048000-08050000 r-xp 00000000 08:01 42       /opt/Serious Sam/Talos\n";

        assert_eq!(
            lowest_mapping_of(maps, Path::new("/opt/Serious Sam/Talos")),
            Some(0x0804_8000)
        );
    }

    #[test]
    fn comm_prefix() {
        assert!(comm_matches("Talos", "Talos"));
        assert!(comm_matches("Talos.x86", "Talos"));
        assert!(!comm_matches("bash", "Talos"));

        // names are truncated by the kernel
        assert!(comm_matches("SeriousSamTheFi", "SeriousSamTheFirstEncounter"));
        assert!(!comm_matches("Serious", "SeriousSamTheFirstEncounter"));
    }
}
