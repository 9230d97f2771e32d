use super::{artifact_url, download_to};
use crate::config_store::ConfigStore;
use crate::process::command;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// `VS_FIXEDFILEINFO.dwSignature`, little-endian.
const FIXED_FILE_INFO_SIGNATURE: [u8; 4] = [0xBD, 0x04, 0xEF, 0xFE];

pub(super) fn check_version(store: &ConfigStore) -> Result<bool> {
    let server = store.server();
    let java_path = server.java_path.context("runtime path is not configured")?;
    let expected = server.java_version.context("runtime version is not configured")?;

    let exe = store.paths().java_executable(&java_path);
    let bytes = std::fs::read(&exe).with_context(|| format!("failed to read {:?}", exe))?;
    let local = runtime_version(&bytes)
        .with_context(|| format!("no version resource in {:?}", exe))?;

    log::info!("Local runtime version {}, required {}", local, expected);
    Ok(local == expected)
}

/// Version embedded in a Windows executable's version resource.
///
/// Prefers the `FileVersion` string; falls back to the fixed file version
/// rendered as `major.minor.build.revision`.
pub fn runtime_version(image: &[u8]) -> Option<String> {
    file_version_string(image).or_else(|| fixed_file_version(image))
}

fn file_version_string(image: &[u8]) -> Option<String> {
    let key: Vec<u8> = "FileVersion\0"
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    let start = find(image, &key)? + key.len();

    let mut units = image[start..]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .peekable();
    // DWORD alignment padding before the value
    for _ in 0..2 {
        if units.peek() == Some(&0) {
            units.next();
        }
    }
    let value: Vec<u16> = units.take_while(|&unit| unit != 0).take(64).collect();
    let value = String::from_utf16(&value).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn fixed_file_version(image: &[u8]) -> Option<String> {
    let at = find(image, &FIXED_FILE_INFO_SIGNATURE)?;
    let dword = |offset: usize| -> Option<u32> {
        let bytes = image.get(at + offset..at + offset + 4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    };
    // Skip dwSignature and dwStrucVersion
    let ms = dword(8)?;
    let ls = dword(12)?;
    Some(format!(
        "{}.{}.{}.{}",
        ms >> 16,
        ms & 0xFFFF,
        ls >> 16,
        ls & 0xFFFF
    ))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub(super) fn download(store: &ConfigStore) -> Result<()> {
    let server = store.server();
    let url = artifact_url(store, server.java_url.as_deref(), "runtime")?;
    let java_path = server.java_path.context("runtime path is not configured")?;

    let paths = store.paths();
    let profile = paths.profile_dir();
    let target = paths.runtime_dir(&java_path);
    std::fs::create_dir_all(profile)
        .with_context(|| format!("failed to create {:?}", profile))?;

    let dir_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "runtime".to_string());
    let staging_name = format!(".{}-{}", dir_name, uuid::Uuid::new_v4());
    let archive = profile.join(format!("{}.archive", staging_name));
    let staging = profile.join(staging_name);

    let result = install(store.http(), &url, &archive, &staging, &target);

    let _ = std::fs::remove_file(&archive);
    let _ = std::fs::remove_dir_all(&staging);
    result
}

fn install(
    http: &reqwest::blocking::Client,
    url: &str,
    archive: &Path,
    staging: &Path,
    target: &Path,
) -> Result<()> {
    download_to(http, url, archive)?;

    std::fs::create_dir_all(staging)
        .with_context(|| format!("failed to create staging dir {:?}", staging))?;
    extract_archive(archive, staging)?;

    let extracted = newest_top_level_dir(staging)?;

    if target.exists() {
        std::fs::remove_dir_all(target)
            .with_context(|| format!("failed to remove old runtime {:?}", target))?;
    }
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {:?}", parent))?;
    }
    std::fs::rename(&extracted, target)
        .with_context(|| format!("failed to move {:?} to {:?}", extracted, target))?;

    log::info!("Runtime installed at {:?}", target);
    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    Gzip,
}

fn sniff_format(archive: &Path) -> Result<ArchiveFormat> {
    use std::io::Read;

    let mut magic = [0u8; 4];
    std::fs::File::open(archive)
        .and_then(|mut file| file.read_exact(&mut magic))
        .with_context(|| format!("failed to read {:?}", archive))?;
    match magic {
        [b'P', b'K', 0x03, 0x04] => Ok(ArchiveFormat::Zip),
        [0x1F, 0x8B, _, _] => Ok(ArchiveFormat::Gzip),
        _ => anyhow::bail!("unknown archive format (magic {:02X?})", magic),
    }
}

fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let format = sniff_format(archive)?;
    let archive_arg = archive.to_string_lossy().into_owned();
    let dest_arg = dest.to_string_lossy().into_owned();

    // Windows 10+ ships a tar that handles both zip and gzip
    #[cfg(windows)]
    let (program, args) = {
        let _ = format;
        ("tar", vec!["-xf", archive_arg.as_str(), "-C", dest_arg.as_str()])
    };
    #[cfg(not(windows))]
    let (program, args) = match format {
        ArchiveFormat::Gzip => ("tar", vec!["xzf", archive_arg.as_str(), "-C", dest_arg.as_str()]),
        ArchiveFormat::Zip => (
            "unzip",
            vec!["-o", "-q", archive_arg.as_str(), "-d", dest_arg.as_str()],
        ),
    };

    let status = command(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .with_context(|| format!("failed to run {}", program))?;
    if !status.success() {
        anyhow::bail!("{} extraction failed with status {}", program, status);
    }
    Ok(())
}

/// Most recently written directory directly under `dir`, or `dir` itself
/// when the archive had no top-level folder.
fn newest_top_level_dir(dir: &Path) -> Result<PathBuf> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    let mut has_files = false;
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {:?}", dir))? {
        let entry = entry.context("failed to read directory entry")?;
        let meta = entry.metadata().context("failed to read entry metadata")?;
        if !meta.is_dir() {
            has_files = true;
            continue;
        }
        let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
            newest = Some((modified, entry.path()));
        }
    }
    match newest {
        Some((_, path)) if !has_files => Ok(path),
        _ if has_files => Ok(dir.to_path_buf()),
        _ => anyhow::bail!("archive contained no files"),
    }
}
