//! Command line front end for the zippack engine.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use zippack::sfx::{SfxPackage, StubVariant, SFX_FLAG_AUTO, SFX_FLAG_OVERWRITE_ALL};
use zippack::{
    ArchiveReader, ArchiveUpdater, Encryption, Error, FsEnumerator, Host, IoErrorDecision, OverwriteDecision,
    OverwritePrompt, PackOptions, PasswordDecision, SelfExtractorBuilder, SfxSettings, VolumeNaming, VolumeOptions,
};

#[derive(Parser, Debug)]
#[command(name = "zippack")]
#[command(version)]
#[command(about = "Create and update ZIP archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  zippack add backup.zip docs/ -r 2024      store docs/ beneath 2024/ in backup.zip\n  \
  zippack add big.zip data/ --volume-size 100m   span a new archive over 100 MB volumes\n  \
  zippack delete backup.zip 2024/docs       remove a directory and its contents")]
struct Cli {
    /// Answer every prompt with its non-interactive default
    #[arg(short = 'y', long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add files and directories to an archive, creating it if needed
    Add {
        archive: PathBuf,
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[command(flatten)]
        pack: PackArgs,
        /// Split a new archive into volumes of this size (e.g. 1440k, 100m)
        #[arg(long, value_name = "SIZE", value_parser = parse_size)]
        volume_size: Option<u64>,
        /// How volume files are named
        #[arg(long, value_enum, default_value_t = Naming::Sequential)]
        naming: Naming,
        /// Comment for a newly created archive
        #[arg(long)]
        comment: Option<String>,
    },
    /// Delete entries; a directory name takes everything beneath it
    Delete {
        archive: PathBuf,
        #[arg(required = true)]
        names: Vec<String>,
        /// Modify the archive in place instead of through a temporary copy
        #[arg(long)]
        no_backup: bool,
        /// Archive root to re-create when it ends up empty
        #[arg(short = 'r', long)]
        root: Option<String>,
    },
    /// Replace the archive comment
    Comment { archive: PathBuf, text: String },
    /// List entries
    List { archive: PathBuf },
    /// Read every entry and check its CRC
    Test {
        archive: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Build a self-extracting archive
    Sfx {
        output: PathBuf,
        /// Extractor stub, or a stub package with --package
        #[arg(long)]
        stub: PathBuf,
        /// The stub file is a package holding both extractor variants
        #[arg(long)]
        package: bool,
        /// Wrap this existing archive instead of packing paths
        #[arg(long, conflicts_with = "paths")]
        from: Option<PathBuf>,
        paths: Vec<PathBuf>,
        #[command(flatten)]
        pack: PackArgs,
        #[command(flatten)]
        settings: SfxArgs,
    },
}

#[derive(Args, Debug)]
struct PackArgs {
    /// Compression level, 0 stores
    #[arg(short, long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(0..=9))]
    level: u32,
    #[arg(short, long)]
    password: Option<String>,
    /// Encryption used with --password
    #[arg(long, value_enum, default_value_t = Cipher::Aes256)]
    cipher: Cipher,
    /// Store every entry beneath this archive directory
    #[arg(short = 'r', long)]
    root: Option<String>,
    /// Delete the sources once packed
    #[arg(long = "move")]
    move_files: bool,
    /// Modify the archive in place instead of through a temporary copy
    #[arg(long)]
    no_backup: bool,
    /// Set the archive's time to that of its newest entry
    #[arg(long)]
    newest_time: bool,
    /// Skip directories with nothing in them
    #[arg(long)]
    no_empty_dirs: bool,
    /// Replace existing entries without asking
    #[arg(short, long)]
    overwrite: bool,
}

#[derive(Args, Debug)]
struct SfxArgs {
    #[arg(long, default_value = "")]
    title: String,
    #[arg(long, default_value = "")]
    text: String,
    /// Where to extract, e.g. "$(Temp)\\setup" or "$(ProgFiles)\\App"
    #[arg(long, default_value = "")]
    target_dir: String,
    /// Command to run after extraction
    #[arg(long, default_value = "")]
    run: String,
    /// Extract without waiting for the user
    #[arg(long)]
    auto: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Cipher {
    Zipcrypto,
    Aes128,
    Aes256,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Naming {
    Sequential,
    Winzip,
    Same,
}

impl From<Naming> for VolumeNaming {
    fn from(naming: Naming) -> Self {
        match naming {
            Naming::Sequential => VolumeNaming::Sequential,
            Naming::Winzip => VolumeNaming::WinZip,
            Naming::Same => VolumeNaming::SameName,
        }
    }
}

fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (digits, multiplier) = match value.char_indices().last() {
        Some((at, 'k' | 'K')) => (&value[..at], 1024),
        Some((at, 'm' | 'M')) => (&value[..at], 1024 * 1024),
        Some((at, 'g' | 'G')) => (&value[..at], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| format!("invalid size: {value}"))
}

/// Prompts on the terminal, or answers everything unattended with `--yes`.
struct Terminal {
    assume_yes: bool,
    password: Option<Vec<u8>>,
}

impl Terminal {
    fn ask(&self, question: &str) -> Option<String> {
        if self.assume_yes {
            return None;
        }
        eprint!("{question} ");
        io::stderr().flush().ok()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
        }
    }
}

impl Host for Terminal {
    fn confirm_overwrite(&self, prompt: &OverwritePrompt<'_>) -> OverwriteDecision {
        if self.assume_yes {
            return OverwriteDecision::All;
        }
        let question = format!(
            "replace {} ({} bytes) with {} bytes? [y]es, [n]o, [A]ll, [N]one, [c]ancel:",
            prompt.name, prompt.existing_size, prompt.new_size
        );
        match self.ask(&question).as_deref() {
            Some("y") => OverwriteDecision::Yes,
            Some("A") => OverwriteDecision::All,
            Some("n") => OverwriteDecision::Skip,
            Some("N") => OverwriteDecision::SkipAll,
            _ => OverwriteDecision::Cancel,
        }
    }

    fn password(&self, name: &str) -> PasswordDecision {
        if let Some(password) = &self.password {
            return PasswordDecision::All(password.clone());
        }
        match self.ask(&format!("password for {name} (empty to skip):")) {
            Some(password) if !password.is_empty() => PasswordDecision::Ok(password.into_bytes()),
            Some(_) => PasswordDecision::Skip,
            None => PasswordDecision::SkipAll,
        }
    }

    fn io_error(&self, path: &Path, error: &io::Error) -> IoErrorDecision {
        if self.assume_yes {
            log::warn!("{}: {}", path.display(), error);
            return IoErrorDecision::SkipAll;
        }
        let question = format!("{}: {error}. [r]etry, [s]kip, [S]kip all, [c]ancel:", path.display());
        match self.ask(&question).as_deref() {
            Some("r") => IoErrorDecision::Retry,
            Some("s") => IoErrorDecision::Skip,
            Some("S") => IoErrorDecision::SkipAll,
            _ => IoErrorDecision::Cancel,
        }
    }
}

fn pack_options(args: &PackArgs) -> PackOptions {
    let mut options = PackOptions::new()
        .level(args.level)
        .overwrite_all(args.overwrite)
        .backup(!args.no_backup)
        .time_to_newest(args.newest_time)
        .move_files(args.move_files)
        .store_empty_dirs(!args.no_empty_dirs);
    if let Some(root) = &args.root {
        options = options.archive_root(root);
    }
    if let Some(password) = &args.password {
        let encryption = match args.cipher {
            Cipher::Zipcrypto => Encryption::ZipCrypto,
            Cipher::Aes128 => Encryption::Aes128,
            Cipher::Aes256 => Encryption::Aes256,
        };
        options = options.encryption(encryption, password);
    }
    options
}

fn run(cli: Cli) -> Result<(), Error> {
    let mut host = Terminal {
        assume_yes: cli.yes,
        password: None,
    };

    match cli.command {
        Command::Add {
            archive,
            paths,
            pack,
            volume_size,
            naming,
            comment,
        } => {
            let mut options = pack_options(&pack);
            if let Some(size) = volume_size {
                let mut volumes = VolumeOptions::fixed(size);
                volumes.naming = naming.into();
                options = options.volumes(volumes);
            }
            if let Some(comment) = comment {
                options = options.comment(comment);
            }
            let summary = ArchiveUpdater::new(&archive, options, &host).pack(&mut FsEnumerator::new(paths))?;
            println!(
                "{}: {} added, {} replaced, {} unchanged, {} entries",
                archive.display(),
                summary.added,
                summary.replaced,
                summary.unchanged,
                summary.total_entries
            );
            for name in &summary.skipped {
                println!("  skipped {name}");
            }
        }
        Command::Delete {
            archive,
            names,
            no_backup,
            root,
        } => {
            let mut options = PackOptions::new().backup(!no_backup);
            if let Some(root) = root {
                options = options.archive_root(root);
            }
            let summary = ArchiveUpdater::new(&archive, options, &host).delete(&names)?;
            println!(
                "{}: {} deleted, {} left",
                archive.display(),
                summary.deleted,
                summary.total_entries
            );
        }
        Command::Comment { archive, text } => {
            ArchiveUpdater::new(&archive, PackOptions::new(), &host).set_comment(text)?;
        }
        Command::List { archive } => {
            let reader = ArchiveReader::open(File::open(&archive)?)?;
            for entry in reader.entries()? {
                let m = entry.modified;
                println!(
                    "{:>12} {:>12} {:04}-{:02}-{:02} {:02}:{:02}  {}{}",
                    entry.size,
                    entry.compressed_size,
                    m.year(),
                    m.month(),
                    m.day(),
                    m.hour(),
                    m.minute(),
                    entry.name,
                    if entry.is_encrypted() { " *" } else { "" }
                );
            }
            if !reader.comment().is_empty() {
                println!("{}", String::from_utf8_lossy(reader.comment()));
            }
        }
        Command::Test { archive, password } => {
            host.password = password.map(String::into_bytes);
            let reader = ArchiveReader::open(File::open(&archive)?)?;
            let report = reader.verify(&host)?;
            for name in &report.skipped {
                println!("skipped {name}");
            }
            for (name, error) in &report.failed {
                println!("FAILED  {name}: {error}");
            }
            println!("{} ok, {} failed", report.ok, report.failed.len());
            if !report.is_clean() {
                return Err(Error::from(zippack::ErrorKind::InvalidInput {
                    msg: format!("{} entries failed verification", report.failed.len()),
                }));
            }
        }
        Command::Sfx {
            output,
            stub,
            package,
            from,
            paths,
            pack,
            settings,
        } => {
            let options = pack_options(&pack);
            let mut sfx = SfxSettings {
                title: settings.title,
                text: settings.text,
                target_dir: settings.target_dir,
                command: settings.run,
                ..SfxSettings::default()
            };
            if settings.auto {
                sfx.flags |= SFX_FLAG_AUTO;
            }
            if pack.overwrite {
                sfx.flags |= SFX_FLAG_OVERWRITE_ALL;
            }

            let stub = std::fs::read(&stub)?;
            let stub = if package {
                let variant = StubVariant::for_archive(pack.password.is_some(), &sfx);
                SfxPackage::parse(stub)?.stub(variant)?
            } else {
                stub
            };
            let builder = SelfExtractorBuilder::new(stub, sfx)?;

            match from {
                Some(archive) => {
                    let out = io::BufWriter::new(File::create(&output)?);
                    let layout = builder.build(File::open(&archive)?, out)?;
                    println!("{}: payload of {} bytes", output.display(), layout.archive_size);
                }
                None => {
                    let summary = ArchiveUpdater::new(&output, options, &host)
                        .pack_self_extractor(&mut FsEnumerator::new(paths), &builder)?;
                    println!("{}: {} entries", output.display(), summary.total_entries);
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancelled() => {
            eprintln!("zippack: cancelled");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("zippack: {e}");
            ExitCode::FAILURE
        }
    }
}
