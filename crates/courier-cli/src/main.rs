//! courier: envelope-layer tooling over local files
//!
//! Commands:
//!   config show                          - display current configuration
//!   attachment encrypt <in> <out>        - encrypt a file, write a pointer JSON
//!   attachment decrypt <in> <out>        - verify and decrypt using a pointer
//!   attachment sticker <in> <out>        - decrypt a sticker with its pack key
//!   profile encrypt|decrypt <field> ...  - profile field ciphers
//!   profile avatar-encrypt|avatar-decrypt
//!   profile access-key                   - derive the unidentified access key
//!   key derive                           - registration lock / recovery password
//!   storage encrypt|decrypt              - storage-service records and manifests

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::Zeroizing;

use courier_core::config::CourierConfig;
use courier_crypto::attachment::{
    ciphertext_len, decrypt_sticker, padded_size, write_padding, ChunkSizePolicy,
};
use courier_crypto::{
    generate_combined_key, AttachmentReader, AttachmentWriter, CombinedKeyMaterial,
    IncrementalDigest, MasterKey, ProfileCipher, ProfileKey, StreamParams,
};
use courier_crypto::profile::ProfileName;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "courier",
    version,
    about = "Courier envelope-layer tooling",
    long_about = "courier: encrypt and verify attachments, profile fields and storage records"
)]
struct Cli {
    /// Path to courier.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "COURIER_CONFIG",
        default_value = "/etc/courier/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "COURIER_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "COURIER_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Attachment stream cipher
    Attachment {
        #[command(subcommand)]
        action: AttachmentAction,
    },

    /// Profile field and avatar ciphers
    ///
    /// The profile key is read from COURIER_PROFILE_KEY (base64) or prompted.
    Profile {
        #[arg(long, env = "COURIER_PROFILE_KEY", hide_env_values = true)]
        profile_key: Option<String>,

        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Master key derivations
    Key {
        #[arg(long, env = "COURIER_MASTER_KEY", hide_env_values = true)]
        master_key: Option<String>,

        #[command(subcommand)]
        action: KeyAction,
    },

    /// Storage-service record cipher
    Storage {
        #[arg(long, env = "COURIER_MASTER_KEY", hide_env_values = true)]
        master_key: Option<String>,

        #[command(subcommand)]
        action: StorageAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Subcommand, Debug)]
enum AttachmentAction {
    /// Encrypt a file with a fresh key and write its pointer as JSON
    Encrypt {
        input: PathBuf,
        output: PathBuf,
        /// Pointer output path (default: <output>.json)
        #[arg(long)]
        pointer: Option<PathBuf>,
        /// Skip upload padding regardless of config
        #[arg(long)]
        no_pad: bool,
    },

    /// Verify and decrypt a file described by a pointer
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        /// Pointer JSON path (default: <input>.json)
        #[arg(long)]
        pointer: Option<PathBuf>,
    },

    /// Decrypt a sticker using its hex pack key
    Sticker {
        input: PathBuf,
        output: PathBuf,
        #[arg(long, env = "COURIER_PACK_KEY", hide_env_values = true)]
        pack_key: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileField {
    Name,
    About,
    Emoji,
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// Encrypt a profile field, printing base64
    Encrypt {
        field: ProfileField,
        value: String,
        /// Family name, used with the `name` field
        #[arg(long)]
        family: Option<String>,
    },

    /// Decrypt a base64 profile field
    Decrypt { field: ProfileField, value: String },

    /// Encrypt an avatar file
    AvatarEncrypt { input: PathBuf, output: PathBuf },

    /// Decrypt an avatar file
    AvatarDecrypt { input: PathBuf, output: PathBuf },

    /// Print the unidentified access key derived from the profile key
    AccessKey,
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Print registration lock token and recovery password
    Derive,
}

#[derive(Subcommand, Debug)]
enum StorageAction {
    /// Seal a record (--item) or manifest (--manifest)
    Encrypt {
        #[command(flatten)]
        target: StorageTarget,
        input: PathBuf,
        output: PathBuf,
    },

    /// Open a sealed record or manifest
    Decrypt {
        #[command(flatten)]
        target: StorageTarget,
        input: PathBuf,
        output: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = false)]
struct StorageTarget {
    /// Record raw id, base64
    #[arg(long)]
    item: Option<String>,

    /// Manifest version
    #[arg(long)]
    manifest: Option<u64>,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CourierConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(level, &format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "courier starting"
    );

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Attachment { action } => match action {
            AttachmentAction::Encrypt { input, output, pointer, no_pad } => {
                let pointer = pointer.unwrap_or_else(|| sidecar_path(&output));
                let pad = config.attachment.pad_uploads && !no_pad;
                let written = cmd_attachment_encrypt(&config, &input, &output, pad)?;
                written.save(&pointer)?;
                println!("encrypted {} -> {}", input.display(), output.display());
                println!("pointer:  {}", pointer.display());
                Ok(())
            }
            AttachmentAction::Decrypt { input, output, pointer } => {
                let pointer = pointer.unwrap_or_else(|| sidecar_path(&input));
                let pointer = AttachmentPointer::load(&pointer)?;
                cmd_attachment_decrypt(&config, &input, &output, &pointer)
            }
            AttachmentAction::Sticker { input, output, pack_key } => {
                cmd_sticker(&input, &output, &pack_key)
            }
        },
        Commands::Profile { profile_key, action } => {
            let secret = read_secret(profile_key, "profile key (base64): ")?;
            let key = ProfileKey::from_slice(&decode_secret(&secret, "profile key")?)?;
            cmd_profile(key, action)
        }
        Commands::Key { master_key, action: KeyAction::Derive } => {
            let master = read_master_key(master_key)?;
            println!("registration lock:  {}", master.derive_registration_lock()?);
            println!(
                "recovery password:  {}",
                master.derive_registration_recovery_password()?
            );
            Ok(())
        }
        Commands::Storage { master_key, action } => {
            let master = read_master_key(master_key)?;
            cmd_storage(&master, action)
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so command output on stdout stays pipeable.
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

// ── Secrets ───────────────────────────────────────────────────────────────────

fn read_secret(value: Option<String>, prompt: &str) -> Result<SecretString> {
    match value {
        Some(v) => Ok(SecretString::from(v)),
        None => {
            let entered = rpassword::prompt_password(prompt).context("reading secret")?;
            Ok(SecretString::from(entered))
        }
    }
}

fn decode_secret(secret: &SecretString, what: &str) -> Result<Zeroizing<Vec<u8>>> {
    STANDARD
        .decode(secret.expose_secret().trim())
        .map(Zeroizing::new)
        .with_context(|| format!("{what} is not valid base64"))
}

fn read_master_key(value: Option<String>) -> Result<MasterKey> {
    let secret = read_secret(value, "master key (base64): ")?;
    Ok(MasterKey::from_slice(&decode_secret(&secret, "master key")?)?)
}

// ── `courier config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &CourierConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

// ── `courier attachment` ──────────────────────────────────────────────────────

/// Everything a recipient needs to fetch and verify an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AttachmentPointer {
    /// Combined AES + MAC key, base64
    key: String,
    /// SHA-256 of the ciphertext, base64
    digest: String,
    /// Plaintext size before upload padding
    size: u64,
    ciphertext_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    incremental_mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    incremental_chunk_size: Option<usize>,
}

impl AttachmentPointer {
    fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading pointer {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing pointer {}", path.display()))
    }

    fn save(&self, path: &Path) -> Result<()> {
        let rendered = serde_json::to_string_pretty(self)?;
        std::fs::write(path, rendered)
            .with_context(|| format!("writing pointer {}", path.display()))
    }

    fn key(&self) -> Result<CombinedKeyMaterial> {
        let raw = Zeroizing::new(STANDARD.decode(&self.key).context("pointer key")?);
        Ok(CombinedKeyMaterial::from_slice(&raw)?)
    }

    fn stream_params(&self) -> Result<StreamParams> {
        let digest: [u8; 32] = STANDARD
            .decode(&self.digest)
            .context("pointer digest")?
            .try_into()
            .map_err(|d: Vec<u8>| anyhow::anyhow!("digest must be 32 bytes, got {}", d.len()))?;

        let mut params = StreamParams::new(self.ciphertext_size)
            .with_digest(digest)
            .with_plaintext_len(self.size);
        if let (Some(mac), Some(chunk_size)) = (&self.incremental_mac, self.incremental_chunk_size)
        {
            params = params.with_incremental(IncrementalDigest {
                chunk_size,
                digest: STANDARD.decode(mac).context("pointer incremental mac")?,
            });
        }
        Ok(params)
    }
}

/// Remove a partially written output file after a failed decrypt.
fn discard_output(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            path = %path.display(),
            error = %e,
            "could not remove output of failed decrypt"
        ),
    }
}

fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

fn byte_progress(len: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec}",
        )?
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}

fn cmd_attachment_encrypt(
    config: &CourierConfig,
    input: &Path,
    output: &Path,
    pad: bool,
) -> Result<AttachmentPointer> {
    let size = std::fs::metadata(input)
        .with_context(|| format!("stat {}", input.display()))?
        .len();
    let body_len = if pad { padded_size(size) } else { size };
    let policy = ChunkSizePolicy::from(&config.attachment);
    let chunk_size = config
        .attachment
        .incremental_mac
        .then(|| policy.chunk_size_for(ciphertext_len(body_len)));

    let key = generate_combined_key();
    let sink = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    let mut writer = AttachmentWriter::new(sink, &key, chunk_size)?;

    let pb = byte_progress(size, "encrypt")?;
    let mut source = pb.wrap_read(BufReader::new(
        File::open(input).with_context(|| format!("opening {}", input.display()))?,
    ));
    io::copy(&mut source, &mut writer).context("encrypting attachment")?;
    if pad {
        write_padding(&mut writer, size)?;
    }
    let (mut sink, meta) = writer.finish()?;
    sink.flush()?;
    pb.finish_and_clear();

    info!(
        plaintext = size,
        ciphertext = meta.ciphertext_len,
        incremental = meta.incremental.is_some(),
        "attachment encrypted"
    );

    Ok(AttachmentPointer {
        key: STANDARD.encode(key.as_bytes()),
        digest: STANDARD.encode(meta.digest),
        size,
        ciphertext_size: meta.ciphertext_len,
        incremental_chunk_size: meta.incremental.as_ref().map(|d| d.chunk_size),
        incremental_mac: meta.incremental.map(|d| STANDARD.encode(d.digest)),
    })
}

fn cmd_attachment_decrypt(
    config: &CourierConfig,
    input: &Path,
    output: &Path,
    pointer: &AttachmentPointer,
) -> Result<()> {
    let key = pointer.key()?;
    let params = pointer.stream_params()?.with_config(&config.attachment);
    let source = BufReader::new(
        File::open(input).with_context(|| format!("opening {}", input.display()))?,
    );

    let result = (|| -> Result<()> {
        let mut reader = AttachmentReader::open(source, &key, params)?;
        let pb = byte_progress(pointer.size, "decrypt")?;
        let mut sink = pb.wrap_write(BufWriter::new(
            File::create(output).with_context(|| format!("creating {}", output.display()))?,
        ));
        io::copy(&mut reader, &mut sink).context("decrypting attachment")?;
        sink.flush()?;
        pb.finish_and_clear();
        Ok(())
    })();

    if let Err(e) = result {
        // Never leave unverified plaintext behind.
        discard_output(output);
        return Err(e);
    }
    println!("decrypted {} -> {}", input.display(), output.display());
    Ok(())
}

fn cmd_sticker(input: &Path, output: &Path, pack_key: &str) -> Result<()> {
    let pack_key = Zeroizing::new(hex::decode(pack_key.trim()).context("pack key is not hex")?);
    let ciphertext =
        std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let plaintext = decrypt_sticker(&ciphertext, &pack_key)?;
    std::fs::write(output, plaintext).with_context(|| format!("writing {}", output.display()))?;
    println!("decrypted sticker {} -> {}", input.display(), output.display());
    Ok(())
}

// ── `courier profile` ─────────────────────────────────────────────────────────

fn cmd_profile(key: ProfileKey, action: ProfileAction) -> Result<()> {
    match action {
        ProfileAction::AccessKey => {
            println!("{}", STANDARD.encode(key.derive_access_key()?.as_bytes()));
        }
        ProfileAction::Encrypt { field, value, family } => {
            let cipher = ProfileCipher::new(key);
            let sealed = match field {
                ProfileField::Name => {
                    cipher.encrypt_name(&ProfileName::new(value, family))?
                }
                ProfileField::About => cipher.encrypt_about(&value)?,
                ProfileField::Emoji => cipher.encrypt_emoji(&value)?,
            };
            println!("{}", STANDARD.encode(sealed));
        }
        ProfileAction::Decrypt { field, value } => {
            let cipher = ProfileCipher::new(key);
            let sealed = STANDARD.decode(value.trim()).context("value is not base64")?;
            match field {
                ProfileField::Name => {
                    let name = cipher.decrypt_name(&sealed)?;
                    println!("given:  {}", name.given);
                    if let Some(family) = name.family {
                        println!("family: {family}");
                    }
                }
                ProfileField::About | ProfileField::Emoji => {
                    println!("{}", cipher.decrypt_string(&sealed)?);
                }
            }
        }
        ProfileAction::AvatarEncrypt { input, output } => {
            let cipher = ProfileCipher::new(key);
            let mut source = BufReader::new(
                File::open(&input).with_context(|| format!("opening {}", input.display()))?,
            );
            let sink = BufWriter::new(
                File::create(&output).with_context(|| format!("creating {}", output.display()))?,
            );
            let mut writer = cipher.avatar_writer(sink)?;
            io::copy(&mut source, &mut writer).context("encrypting avatar")?;
            writer.finish()?.flush()?;
            println!("encrypted avatar {} -> {}", input.display(), output.display());
        }
        ProfileAction::AvatarDecrypt { input, output } => {
            let cipher = ProfileCipher::new(key);
            let source = BufReader::new(
                File::open(&input).with_context(|| format!("opening {}", input.display()))?,
            );
            let result = (|| -> Result<()> {
                let mut reader = cipher.avatar_reader(source)?;
                let mut sink = BufWriter::new(
                    File::create(&output)
                        .with_context(|| format!("creating {}", output.display()))?,
                );
                io::copy(&mut reader, &mut sink).context("decrypting avatar")?;
                sink.flush()?;
                Ok(())
            })();
            if let Err(e) = result {
                discard_output(&output);
                return Err(e);
            }
            println!("decrypted avatar {} -> {}", input.display(), output.display());
        }
    }
    Ok(())
}

// ── `courier storage` ─────────────────────────────────────────────────────────

fn cmd_storage(master: &MasterKey, action: StorageAction) -> Result<()> {
    let storage = master.derive_storage_service_key()?;
    let (target, input, output, sealing) = match action {
        StorageAction::Encrypt { target, input, output } => (target, input, output, true),
        StorageAction::Decrypt { target, input, output } => (target, input, output, false),
    };

    let mut data = Vec::new();
    File::open(&input)
        .with_context(|| format!("opening {}", input.display()))?
        .read_to_end(&mut data)?;

    let result = match (target.item, target.manifest) {
        (Some(raw_id), _) => {
            let raw_id = STANDARD.decode(raw_id.trim()).context("item id is not base64")?;
            if sealing {
                storage.encrypt_item(&raw_id, &data)?
            } else {
                storage.decrypt_item(&raw_id, &data)?
            }
        }
        (None, Some(version)) => {
            if sealing {
                storage.encrypt_manifest(version, &data)?
            } else {
                storage.decrypt_manifest(version, &data)?
            }
        }
        (None, None) => anyhow::bail!("one of --item or --manifest is required"),
    };

    std::fs::write(&output, result).with_context(|| format!("writing {}", output.display()))?;
    println!("{} -> {}", input.display(), output.display());
    Ok(())
}
