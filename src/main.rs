use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use secrecy::SecretString;

use mailseal::config::{DispatchConfig, SmtpConfig};
use mailseal::crypto::{
    DEFAULT_S2K_COUNT, EncryptionEngine, PgpEngine, PgpSecretKey, generate_keypair,
};
use mailseal::error::ConfigError;
use mailseal::open::open_mail;
use mailseal::transport::SmtpConnector;
use mailseal::{MailMessage, Mailer, PrivateKeyOptions, SendOptions};

#[derive(Parser, Debug)]
#[command(name = "mailseal")]
#[command(version, about = "Encrypting, signing mail dispatcher", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a passphrase-locked OpenPGP key pair
    Keygen {
        /// User ID, e.g. "Alice <alice@example.com>"
        user_id: String,

        /// Output prefix; writes <prefix>.key and <prefix>.pub
        #[arg(long, default_value = "mailseal")]
        out: PathBuf,

        #[arg(long, env = "MAILSEAL_PASSPHRASE", hide_env_values = true)]
        passphrase: String,
    },

    /// Send a JSON mail file through the SMTP relay configured in the environment
    Send {
        /// Mail description (from, to, cc, bcc, subject, body, attachments)
        mail: PathBuf,

        /// Recipient public key; repeat to encrypt to several keys
        #[arg(long = "encrypt-to")]
        encrypt_to: Vec<PathBuf>,

        /// Sender private key used to sign encrypted mail
        #[arg(long)]
        key: Option<PathBuf>,

        #[arg(long, env = "MAILSEAL_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,
    },

    /// Read a received message, decrypting and verifying it when sealed
    Open {
        /// Raw RFC 5322 message
        message: PathBuf,

        /// Recipient private key
        #[arg(long)]
        key: Option<PathBuf>,

        /// Sender public key to verify the signature against
        #[arg(long)]
        sender: Option<PathBuf>,

        #[arg(long, env = "MAILSEAL_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,

        /// Directory to write attachments into
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Keygen {
            user_id,
            out,
            passphrase,
        } => keygen(&user_id, &out, passphrase),
        Commands::Send {
            mail,
            encrypt_to,
            key,
            passphrase,
        } => send(&mail, &encrypt_to, key.as_deref(), passphrase).await,
        Commands::Open {
            message,
            key,
            sender,
            passphrase,
            out,
        } => open(&message, key.as_deref(), sender.as_deref(), passphrase, out.as_deref()),
    }
}

fn keygen(user_id: &str, out: &Path, passphrase: String) -> anyhow::Result<()> {
    let (private, public) =
        generate_keypair(user_id, &SecretString::from(passphrase), DEFAULT_S2K_COUNT)?;
    let private_path = out.with_extension("key");
    let public_path = out.with_extension("pub");
    std::fs::write(&private_path, private)
        .with_context(|| format!("writing {}", private_path.display()))?;
    std::fs::write(&public_path, public)
        .with_context(|| format!("writing {}", public_path.display()))?;

    eprintln!("Private key: {}", private_path.display());
    eprintln!("Public key:  {}", public_path.display());
    Ok(())
}

async fn send(
    mail_path: &Path,
    encrypt_to: &[PathBuf],
    key: Option<&Path>,
    passphrase: Option<String>,
) -> anyhow::Result<()> {
    let config = DispatchConfig::from_env()?;
    let smtp = SmtpConfig::from_env()?
        .ok_or_else(|| ConfigError::MissingEnvVar("MAILSEAL_SMTP_HOST".into()))?;
    eprintln!("📮 mailseal v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   SMTP: {}:{}", smtp.host, smtp.port);

    let mail: MailMessage = serde_json::from_str(&read_text(mail_path)?)
        .with_context(|| format!("parsing {}", mail_path.display()))?;

    let mailer = Mailer::with_transport_factory(
        Arc::new(PgpEngine::new()),
        config,
        Arc::new(SmtpConnector::new(smtp)),
    );

    if let Some(key) = key {
        mailer
            .set_private_key(PrivateKeyOptions {
                private_key_armored: read_text(key)?,
                passphrase: require_passphrase(passphrase)?,
            })
            .await?;
    }

    let mut options = SendOptions::new(mail);
    if !encrypt_to.is_empty() {
        let keys = encrypt_to
            .iter()
            .map(|path| read_text(path))
            .collect::<anyhow::Result<Vec<_>>>()?;
        options = options.encrypted(keys);
    }

    let receipt = mailer.send(options).await;
    mailer.shutdown().await;
    let receipt = receipt?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn open(
    message: &Path,
    key: Option<&Path>,
    sender: Option<&Path>,
    passphrase: Option<String>,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let engine = PgpEngine::new();
    let raw = std::fs::read(message).with_context(|| format!("reading {}", message.display()))?;

    let secret: Option<PgpSecretKey> = match key {
        Some(path) => Some(engine.unlock(&read_text(path)?, &require_passphrase(passphrase)?)?),
        None => None,
    };
    let sender = sender.map(read_text).transpose()?;

    let opened = open_mail(&engine, &raw, secret.as_ref(), sender.as_deref())?;

    println!("Subject: {}", opened.subject.as_deref().unwrap_or(""));
    println!(
        "Encrypted: {}  Signature: {}",
        opened.encrypted,
        if opened.verified { "verified" } else { "not checked" }
    );
    println!();
    println!("{}", opened.body.trim_end());

    for attachment in &opened.attachments {
        println!(
            "\n[attachment] {} ({}, {} bytes)",
            attachment.filename,
            attachment.mime_type,
            attachment.content.len()
        );
        if let Some(dir) = out {
            let name = Path::new(&attachment.filename)
                .file_name()
                .context("attachment has no usable filename")?;
            let path = dir.join(name);
            std::fs::write(&path, &attachment.content)
                .with_context(|| format!("writing {}", path.display()))?;
        }
    }
    Ok(())
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn require_passphrase(passphrase: Option<String>) -> anyhow::Result<SecretString> {
    match passphrase {
        Some(p) => Ok(SecretString::from(p)),
        None => bail!("a passphrase is required (--passphrase or MAILSEAL_PASSPHRASE)"),
    }
}
