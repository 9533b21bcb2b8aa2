use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use nodefields_core::{
    is_reserved_custom_field_key, parse_otp, seconds_remaining, FieldDictionary, FieldsConfig,
    NodeFields, OtpCarrier, OtpKind, SerializationContext,
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Inspect and convert password entry field dictionaries
#[derive(Parser)]
#[command(name = "nodefields")]
#[command(about = "Inspect entry fields and OTP configurations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// OTP configuration tools
    Otp {
        #[command(subcommand)]
        command: OtpCommands,
    },

    /// Print a summary of a JSON field dictionary
    Inspect {
        /// Path to the dictionary
        file: PathBuf,

        /// Field policy file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Re-serialize a dictionary with OTP data in another carrier
    Convert {
        /// Path to the dictionary
        file: PathBuf,

        /// Where the OTP configuration should be written
        #[arg(long, value_enum)]
        carrier: CarrierArg,

        /// Field policy file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum OtpCommands {
    /// Parse an otpauth URI or bare base32 secret
    Parse {
        input: String,

        /// Treat the token as a Steam Guard token
        #[arg(long)]
        steam: bool,

        /// Issuer used when the input does not carry one
        #[arg(long, default_value = "")]
        issuer: String,

        /// Account name used when the input does not carry one
        #[arg(long, default_value = "")]
        username: String,
    },

    /// Generate a code
    Code {
        input: String,

        /// Unix time to generate the code for (defaults to now)
        #[arg(long)]
        at: Option<i64>,

        /// Treat the token as a Steam Guard token
        #[arg(long)]
        steam: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CarrierArg {
    CustomField,
    Legacy,
    Password,
    Notes,
}

impl From<CarrierArg> for OtpCarrier {
    fn from(arg: CarrierArg) -> Self {
        match arg {
            CarrierArg::CustomField => OtpCarrier::CustomField,
            CarrierArg::Legacy => OtpCarrier::LegacyCustomFields,
            CarrierArg::Password => OtpCarrier::Password,
            CarrierArg::Notes => OtpCarrier::Notes,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Otp { command } => run_otp(command),
        Commands::Inspect { file, config } => {
            let fields = load_fields(&file, config.as_deref())?;
            inspect(&fields);
            Ok(())
        }
        Commands::Convert {
            file,
            carrier,
            config,
        } => {
            let fields = load_fields(&file, config.as_deref())?;
            let dict = fields.serialize(&SerializationContext::new(carrier.into()));
            println!("{}", serde_json::to_string_pretty(&dict)?);
            Ok(())
        }
    }
}

fn run_otp(command: OtpCommands) -> Result<()> {
    match command {
        OtpCommands::Parse {
            input,
            steam,
            issuer,
            username,
        } => {
            let Some(token) = parse_otp(&input, steam, &issuer, &username) else {
                bail!("not an OTP configuration");
            };
            println!("{}", serde_json::to_string_pretty(&token)?);
            println!("{}", token.to_uri());
        }
        OtpCommands::Code { input, at, steam } => {
            let Some(token) = parse_otp(&input, steam, "", "") else {
                bail!("not an OTP configuration");
            };
            let timestamp = at.unwrap_or_else(|| Utc::now().timestamp());
            let code = token.code_at(timestamp)?;
            match token.kind {
                OtpKind::Totp { period } => {
                    println!("{} ({}s remaining)", code, seconds_remaining(period, timestamp))
                }
                OtpKind::Hotp { counter } => println!("{} (counter {})", code, counter),
            }
        }
    }
    Ok(())
}

fn load_fields(file: &Path, config: Option<&Path>) -> Result<NodeFields> {
    let config = match config {
        Some(path) => FieldsConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => FieldsConfig::default(),
    };

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let dict: FieldDictionary = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON object", file.display()))?;
    debug!("Loaded {} top-level keys from {}", dict.len(), file.display());

    let fields = NodeFields::deserialize_with_config(&dict, &config)?;
    info!("Deserialized entry from {}", file.display());
    Ok(fields)
}

fn inspect(fields: &NodeFields) {
    let expiry = |date: Option<chrono::DateTime<Utc>>| {
        date.map(|d| d.to_rfc3339()).unwrap_or_else(|| "never".to_string())
    };

    println!("username:        {}", fields.username());
    println!("url:             {}", fields.url());
    println!("expires:         {}", expiry(fields.expires()));
    println!("expired:         {}", fields.expired());
    println!("nearly expired:  {}", fields.nearly_expired());
    println!(
        "usage count:     {}",
        fields
            .usage_count()
            .map_or_else(|| "-".to_string(), |c| c.to_string())
    );

    for url in fields.alternative_urls() {
        println!("alternative url: {}", url);
    }
    for key in fields
        .custom_fields()
        .keys()
        .filter(|key| !is_reserved_custom_field_key(key))
    {
        println!("custom field:    {}", key);
    }

    println!("attachments:     {}", fields.attachments().len());
    println!("password history: {}", fields.password_history().len());
    println!("entry history:   {}", fields.keepass_history().len());

    match fields.otp_token() {
        Some(token) => println!("otp:             {}", token.to_uri()),
        None => println!("otp:             none"),
    }
}
