//! Command-line interface for zresign.
//!
//! Re-signs app bundles and IPA files through the resign pipeline, and
//! exposes the load-command patcher and package extractor for one-off use.

use clap::{ArgAction, Args, Parser, Subcommand};
use log::LevelFilter;
use secrecy::SecretString;
use std::fs;
use std::path::PathBuf;
use zresign::{
    archive, create_ipa, insert_library_reference, list_library_references,
    remove_library_references, Catalog, CompressionLevel, DirectoryCatalog, InjectionRequest,
    Overrides, SigningOptions, SigningRequest, ZResign,
};

#[derive(Parser)]
#[command(name = "zresign")]
#[command(about = "Re-sign iOS apps and inject tweaks")]
struct Cli {
    /// Increase logging verbosity (repeatable)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-sign an .app or .ipa and publish it into storage
    Sign(SignArgs),
    /// Add a weak load command to a Mach-O executable
    Inject {
        binary: PathBuf,
        /// Install name to reference, e.g. @executable_path/Frameworks/Tweak.dylib
        path: String,
        /// Emit LC_LOAD_DYLIB instead of LC_LOAD_WEAK_DYLIB
        #[arg(long)]
        strong: bool,
    },
    /// Remove load commands from a Mach-O executable
    Remove {
        binary: PathBuf,
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// List the libraries a Mach-O executable references
    List { binary: PathBuf },
    /// Unpack a .deb package
    Extract { package: PathBuf, dest: PathBuf },
    /// Import a certificate into the catalog
    Import(ImportArgs),
}

#[derive(Args)]
struct SignArgs {
    /// Input .app directory or .ipa file
    input: PathBuf,

    /// Directory signed apps are published into
    #[arg(long, env = "ZRESIGN_STORAGE")]
    storage: PathBuf,

    /// Catalog directory
    #[arg(long, env = "ZRESIGN_CATALOG")]
    catalog: PathBuf,

    /// Certificate id in the catalog (default: the current one)
    #[arg(long)]
    certificate: Option<String>,

    /// Key container password, overriding the one stored in the catalog
    #[arg(long, env = "ZRESIGN_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// SigningOptions as a JSON file
    #[arg(long)]
    options: Option<PathBuf>,

    /// Tweak source (path, file:// or http(s):// URL); repeatable
    #[arg(short, long = "tweak")]
    tweaks: Vec<String>,

    /// Install name to remove from the executable; repeatable
    #[arg(long = "remove")]
    removals: Vec<String>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    bundle_id: Option<String>,

    #[arg(long = "app-version")]
    app_version: Option<String>,

    /// PNG or JPEG used to regenerate the app icons
    #[arg(long)]
    icon: Option<PathBuf>,

    /// Recorded in the catalog as the app's origin
    #[arg(long)]
    source_url: Option<String>,

    /// Package providing CydiaSubstrate.framework when the app lacks one
    #[arg(long, env = "ZRESIGN_SHIM")]
    shim: Option<PathBuf>,

    /// zsign executable
    #[arg(long, env = "ZRESIGN_ZSIGN", default_value = "zsign")]
    zsign: PathBuf,

    /// Also write the signed app as an IPA
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// ZIP compression level for --output (0-9)
    #[arg(short = 'z', long, default_value = "6")]
    zip_level: u32,
}

#[derive(Args)]
struct ImportArgs {
    /// Catalog directory
    #[arg(long, env = "ZRESIGN_CATALOG")]
    catalog: PathBuf,
    id: String,
    profile: PathBuf,
    key_container: PathBuf,
    #[arg(long, env = "ZRESIGN_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// Make this the current certificate
    #[arg(long)]
    current: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level.as_str()));
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }
    builder.init();

    match cli.command {
        Command::Sign(args) => command_sign(args),
        Command::Inject { binary, path, strong } => {
            let slices = insert_library_reference(&binary, &path, !strong)?;
            println!("{} slice(s) updated", slices);
            Ok(())
        }
        Command::Remove { binary, paths } => {
            let removed = remove_library_references(&binary, &paths[..])?;
            println!("{} load command(s) removed", removed);
            Ok(())
        }
        Command::List { binary } => {
            for reference in list_library_references(&binary)? {
                let kind = if reference.is_weak() { "weak" } else { "load" };
                println!("{:#010x} {} {}", reference.cpu_type, kind, reference.path);
            }
            Ok(())
        }
        Command::Extract { package, dest } => {
            for root in archive::unpack_package(&package, &dest)? {
                println!("{}", root.display());
            }
            Ok(())
        }
        Command::Import(args) => {
            let catalog = DirectoryCatalog::new(&args.catalog);
            let password = args.password.map(SecretString::new);
            catalog.import_certificate(
                &args.id,
                &args.profile,
                &args.key_container,
                password.as_ref(),
                args.current,
            )?;
            println!("Imported {}", args.id);
            Ok(())
        }
    }
}

fn command_sign(args: SignArgs) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = DirectoryCatalog::new(&args.catalog);

    let mut identity = match &args.certificate {
        Some(id) => catalog
            .identity(id)
            .ok_or_else(|| format!("certificate {} is not in the catalog", id))?,
        None => catalog
            .current_signing_identity()
            .ok_or("no current certificate in the catalog; pass --certificate")?,
    };
    if let Some(password) = args.password {
        identity.password = SecretString::new(password);
    }

    let options = match &args.options {
        Some(path) => SigningOptions::from_json(&fs::read_to_string(path)?)?,
        None => SigningOptions::default(),
    };
    let icon = match &args.icon {
        Some(path) => Some(fs::read(path)?),
        None => None,
    };

    let mut builder = ZResign::new()
        .storage_root(&args.storage)
        .catalog(catalog)
        .zsign(&args.zsign);
    if let Some(shim) = &args.shim {
        builder = builder.shim_package(shim);
    }
    let pipeline = builder.observer(|state| log::debug!("state: {}", state)).build()?;

    let request = SigningRequest {
        input: args.input,
        identity,
        options,
        injection: InjectionRequest {
            sources: args.tweaks,
            remove: args.removals,
        },
        overrides: Overrides {
            name: args.name,
            bundle_id: args.bundle_id,
            version: args.app_version,
            icon,
        },
        source_url: args.source_url,
    };

    let outcome = pipeline.spawn(request).wait()?;
    println!("{}", outcome.app_path.display());

    match &outcome.registration {
        Ok(record) => println!("{}", serde_json::to_string_pretty(record)?),
        Err(e) => log::warn!("published but not registered: {}", e),
    }

    if let Some(output) = &args.output {
        create_ipa(&outcome.app_path, output, CompressionLevel::new(args.zip_level))?;
        println!("{}", output.display());
    }
    Ok(())
}
