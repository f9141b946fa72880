use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use sha2::{Digest, Sha256};

use crate::plist;

const CLEAN_ATTEMPTS: usize = 3;
const CLEAN_RETRY_SLEEP: Duration = Duration::from_millis(500);

/// Payload copied into Contents/Resources. Missing sources are warned
/// about and skipped so a checkout without the backend assets can still
/// produce a shell-only bundle for UI work.
const DATA_ENTRIES: &[(&str, &str)] = &[
    ("backend", "backend"),
    ("assets/icon.icns", "icon.icns"),
];

#[derive(Args)]
pub struct BundleArgs {
    /// codesign identity; unsigned when omitted
    #[arg(long)]
    pub sign_identity: Option<String>,
    /// Directory holding a prebuilt release binary; implies no cargo build
    #[arg(long)]
    pub release_dir: Option<PathBuf>,
    /// Reuse target/release as-is instead of invoking cargo
    #[arg(long)]
    pub skip_build: bool,
}

pub fn repo_root() -> Result<PathBuf> {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    dir.ancestors()
        .nth(2)
        .map(|p| p.to_path_buf())
        .ok_or_else(|| anyhow!("failed to locate repo root from {}", dir.display()))
}

pub fn clean_dist() -> Result<()> {
    let root = repo_root()?;
    remove_dir_with_retry(&root.join("dist"))
}

/// Bounded retry around directory removal: transient file locks from an
/// indexer or a just-killed process clear quickly, and `rm -rf` is the
/// last resort when they do not.
pub fn remove_dir_with_retry(dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let mut last_err = None;
    for attempt in 1..=CLEAN_ATTEMPTS {
        match fs::remove_dir_all(dir) {
            Ok(()) => return Ok(()),
            Err(e) => {
                eprintln!(
                    "clean: attempt {attempt}/{CLEAN_ATTEMPTS} failed for {}: {e}",
                    dir.display()
                );
                last_err = Some(e);
                std::thread::sleep(CLEAN_RETRY_SLEEP);
            }
        }
    }

    if cfg!(unix) {
        let status = Command::new("rm")
            .arg("-rf")
            .arg(dir)
            .status()
            .context("spawn rm -rf failed")?;
        if status.success() && !dir.exists() {
            return Ok(());
        }
    }
    Err(anyhow!(
        "failed to remove {}: {}",
        dir.display(),
        last_err.map(|e| e.to_string()).unwrap_or_default()
    ))
}

pub fn run(args: &BundleArgs) -> Result<()> {
    let root = repo_root()?;
    let dist = root.join("dist");

    println!("cleaning {}", dist.display());
    remove_dir_with_retry(&dist)?;

    // A caller-given release dir means the binary was built elsewhere.
    if !args.skip_build && args.release_dir.is_none() {
        println!("building voicemorph-desktop (release)");
        let status = Command::new("cargo")
            .current_dir(&root)
            .args(["build", "--release", "-p", "voicemorph-desktop"])
            .status()
            .context("spawn cargo build failed")?;
        if !status.success() {
            bail!("cargo build failed: {status}");
        }
    }

    let binary = resolve_release_dir(&root, args.release_dir.as_deref()).join("voicemorph-desktop");
    if !binary.exists() {
        bail!("release binary not found at {}", binary.display());
    }

    let app = dist.join(format!("{}.app", plist::APP_NAME));
    let macos_dir = app.join("Contents").join("MacOS");
    let resources_dir = app.join("Contents").join("Resources");
    fs::create_dir_all(&macos_dir).context("create MacOS dir failed")?;
    fs::create_dir_all(&resources_dir).context("create Resources dir failed")?;

    let bundled_binary = macos_dir.join(plist::APP_NAME);
    fs::copy(&binary, &bundled_binary)
        .with_context(|| format!("copy binary to {} failed", bundled_binary.display()))?;

    for (source, dest) in DATA_ENTRIES {
        let src = root.join(source);
        if !src.exists() {
            eprintln!("WARNING: source {} not found, skipping", src.display());
            continue;
        }
        let dst = resources_dir.join(dest);
        copy_recursive(&src, &dst)
            .with_context(|| format!("copy {} -> {} failed", src.display(), dst.display()))?;
        println!("bundled {} -> Resources/{dest}", source);
    }

    let plist_path = app.join("Contents").join("Info.plist");
    fs::write(&plist_path, plist::render_info_plist()).context("write Info.plist failed")?;
    println!("wrote {}", plist_path.display());

    write_build_manifest(&dist, &bundled_binary, &plist_path)?;

    if let Some(identity) = &args.sign_identity {
        sign(&app, &dist, identity)?;
    } else {
        println!("no signing identity given; bundle left unsigned");
    }

    println!("bundle complete: {}", app.display());
    Ok(())
}

fn resolve_release_dir(root: &Path, release_dir: Option<&Path>) -> PathBuf {
    match release_dir {
        Some(d) => d.to_path_buf(),
        None => root.join("target").join("release"),
    }
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
    }
    Ok(())
}

fn sha256_file(path: &Path) -> Result<String> {
    let bytes =
        fs::read(path).with_context(|| format!("read file failed: {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Record what went into the bundle. The digests let a release pipeline
/// confirm it is shipping the binary this run produced.
fn write_build_manifest(dist: &Path, binary: &Path, plist_path: &Path) -> Result<()> {
    let manifest = serde_json::json!({
        "app": plist::APP_NAME,
        "bundle_id": plist::BUNDLE_ID,
        "version": plist::BUNDLE_VERSION,
        "built_at": chrono::Utc::now().to_rfc3339(),
        "binary_sha256": sha256_file(binary)?,
        "info_plist_sha256": sha256_file(plist_path)?,
    });
    let path = dist.join("build-manifest.json");
    fs::write(&path, serde_json::to_string_pretty(&manifest)?)
        .context("write build manifest failed")?;
    println!("wrote {}", path.display());
    Ok(())
}

fn sign(app: &Path, dist: &Path, identity: &str) -> Result<()> {
    let entitlements = dist.join("entitlements.plist");
    fs::write(&entitlements, plist::render_entitlements())
        .context("write entitlements failed")?;

    println!("signing with identity {identity:?}");
    let status = Command::new("codesign")
        .args(["--deep", "--force", "--options", "runtime", "--entitlements"])
        .arg(&entitlements)
        .args(["--sign", identity])
        .arg(app)
        .status()
        .context("spawn codesign failed")?;
    if !status.success() {
        bail!("codesign failed: {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_dir_override_wins_over_target_release() {
        let root = Path::new("/repo");
        assert_eq!(
            resolve_release_dir(root, None),
            PathBuf::from("/repo/target/release")
        );
        let custom = Path::new("/ci/artifacts");
        assert_eq!(resolve_release_dir(root, Some(custom)), custom);
    }

    #[test]
    fn remove_missing_dir_is_ok() {
        let td = tempfile::tempdir().expect("tempdir");
        let gone = td.path().join("never-existed");
        remove_dir_with_retry(&gone).expect("ok");
    }

    #[test]
    fn remove_populated_dir_succeeds() {
        let td = tempfile::tempdir().expect("tempdir");
        let dir = td.path().join("dist");
        fs::create_dir_all(dir.join("nested/deeper")).unwrap();
        fs::write(dir.join("nested/deeper/file.txt"), b"x").unwrap();
        remove_dir_with_retry(&dir).expect("removed");
        assert!(!dir.exists());
    }

    #[test]
    fn copy_recursive_preserves_tree() {
        let td = tempfile::tempdir().expect("tempdir");
        let src = td.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("a/b/f.txt"), b"payload").unwrap();
        fs::write(src.join("top.txt"), b"top").unwrap();

        let dst = td.path().join("dst");
        copy_recursive(&src, &dst).expect("copy");
        assert_eq!(fs::read(dst.join("a/b/f.txt")).unwrap(), b"payload");
        assert_eq!(fs::read(dst.join("top.txt")).unwrap(), b"top");
    }

    #[test]
    fn sha256_matches_known_vector() {
        let td = tempfile::tempdir().expect("tempdir");
        let p = td.path().join("f");
        fs::write(&p, b"abc").unwrap();
        assert_eq!(
            sha256_file(&p).expect("digest"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
