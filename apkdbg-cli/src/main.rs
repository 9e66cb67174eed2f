use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use apkdbg_axml::{patch_manifest_bytes, patch_manifest_file};
use apkdbg_zip::ZipArchive;
use clap::{Parser, Subcommand};
use log::info;

const MANIFEST_NAME: &str = "AndroidManifest.xml";

const ZIPALIGN_EXE: &str = "zipalign";
const APKSIGNER_EXE: &str = "apksigner";

#[derive(Parser)]
#[command(version, long_about = None)]
#[command(arg_required_else_help = true)]
#[command(about = "Forces android:debuggable=\"true\" onto an APK manifest")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Patches a bare binary AndroidManifest.xml file.
    Xml { input: PathBuf, output: PathBuf },
    /// Patches the manifest inside an APK, then aligns and re-signs the
    /// archive with the zipalign and apksigner tools from the PATH.
    Apk {
        input: PathBuf,
        output: PathBuf,
        keystore: PathBuf,
        key_alias: String,
        keystore_pass: String,
    },
}

/// Runs an external tool, failing on a nonzero exit status.
fn invoke_tool(exe: &str, args: impl IntoIterator<Item = impl AsRef<OsStr>>) -> Result<()> {
    let output = Command::new(exe)
        .args(args)
        .output()
        .with_context(|| format!("Invoking {exe} (is it on the PATH?)"))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(anyhow!(
            "{exe} exited with {}. stderr: {}, stdout: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr),
            String::from_utf8_lossy(&output.stdout),
        ))
    }
}

fn patch_apk(
    input: &Path,
    output: &Path,
    keystore: &Path,
    key_alias: &str,
    keystore_pass: &str,
) -> Result<()> {
    let file = File::open(input).context("Opening input APK")?;
    let mut zip = ZipArchive::open(file).context("Reading APK central directory")?;

    info!("Patching {MANIFEST_NAME}");
    let manifest = zip
        .read_entry(MANIFEST_NAME)
        .context("Reading manifest from APK")?;
    let patched = patch_manifest_bytes(&manifest).context("Patching manifest")?;

    let unaligned = output.with_extension("unaligned.apk");
    {
        let mut out_file = BufWriter::new(File::create(&unaligned).context("Creating output APK")?);
        zip.write_replacing(&mut out_file, MANIFEST_NAME, &patched)
            .context("Writing patched APK")?;
        out_file.flush().context("Flushing output APK")?;
    }

    info!("Aligning");
    invoke_tool(
        ZIPALIGN_EXE,
        [
            OsStr::new("-p"),
            OsStr::new("4"),
            unaligned.as_os_str(),
            output.as_os_str(),
        ],
    )
    .context("Aligning APK")?;
    invoke_tool(
        ZIPALIGN_EXE,
        [OsStr::new("-c"), OsStr::new("4"), output.as_os_str()],
    )
    .context("Verifying APK alignment")?;

    info!("Signing");
    invoke_tool(
        APKSIGNER_EXE,
        [
            OsStr::new("sign"),
            OsStr::new("--ks"),
            keystore.as_os_str(),
            OsStr::new("--ks-key-alias"),
            OsStr::new(key_alias),
            OsStr::new("--ks-pass"),
            OsStr::new(&format!("pass:{keystore_pass}")),
            output.as_os_str(),
        ],
    )
    .context("Signing APK")?;
    invoke_tool(APKSIGNER_EXE, [OsStr::new("verify"), output.as_os_str()])
        .context("Verifying APK signature")?;

    std::fs::remove_file(&unaligned).context("Removing unaligned APK")?;
    info!("Wrote {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Xml { input, output } => {
            patch_manifest_file(&input, &output)?;
            info!("Wrote {}", output.display());
        }
        Commands::Apk {
            input,
            output,
            keystore,
            key_alias,
            keystore_pass,
        } => patch_apk(&input, &output, &keystore, &key_alias, &keystore_pass)?,
    }
    Ok(())
}
