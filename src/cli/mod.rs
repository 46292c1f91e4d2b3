//! CLI subcommands: init, validate, plan, show, completions.

use crate::core::catalog::Catalog;
use crate::core::error::Error;
use crate::core::planner::{self, PlanRequest};
use crate::core::resolver::ResolvedModel;
use crate::core::types::{format_params, LoadPlan};
use clap::{CommandFactory, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "beamplan",
    version,
    about = "Beamline model definition resolver and load planner"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter model definition
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Parse, resolve and plan every sequence/range/optic combination
    Validate {
        /// Path to the model document (.json, .yaml, .toml)
        #[arg(short, long, default_value = "model.yaml")]
        file: PathBuf,
    },

    /// Show the load plan for a sequence, range and optic
    Plan {
        /// Path to the model document
        #[arg(short, long, default_value = "model.yaml")]
        file: PathBuf,

        /// Model name (required when the document holds several)
        #[arg(short, long)]
        model: Option<String>,

        /// Sequence (default: the model's default-sequence)
        #[arg(short, long)]
        sequence: Option<String>,

        /// Range (default: the sequence's default-range)
        #[arg(short, long)]
        range: Option<String>,

        /// Optic (default: the model's default-optic)
        #[arg(short, long)]
        optic: Option<String>,

        /// Include aperture files and offsets
        #[arg(long)]
        aperture: bool,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the sequences, ranges, optics and beams of each model
    Show {
        /// Path to the model document
        #[arg(short, long, default_value = "model.yaml")]
        file: PathBuf,

        /// Restrict to one model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), Error> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            model,
            sequence,
            range,
            optic,
            aperture,
            json,
        } => {
            let request = PlanRequest {
                sequence,
                range,
                optic,
                aperture,
            };
            cmd_plan(&file, model.as_deref(), &request, json)
        }
        Commands::Show { file, model } => cmd_show(&file, model.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "beamplan", &mut std::io::stdout());
            Ok(())
        }
    }
}

const STARTER_MODEL: &str = r##"name: my-line
svn-revision: ""
default-optic: nominal
default-sequence: line

path-offsets:
  resource-offset: my-line

init-files:
  - path: line.seq
    location: RESOURCE

optics:
  - name: nominal
    init-files:
      - path: nominal.str
        parse: STRENGTHS

sequences:
  - name: line
    default-range: ALL
    beam:
      particle: PROTON
      energy: 450
    ranges:
      - name: ALL
        madx-range:
          first: "#s"
          last: "#e"
"##;

fn cmd_init(path: &Path) -> Result<(), Error> {
    let model_path = path.join("model.yaml");
    if model_path.exists() {
        return Err(Error::Io {
            path: model_path,
            source: std::io::Error::new(std::io::ErrorKind::AlreadyExists, "already exists"),
        });
    }
    std::fs::write(&model_path, STARTER_MODEL).map_err(|source| Error::Io {
        path: model_path.clone(),
        source,
    })?;
    println!("Initialized model definition at {}", model_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), Error> {
    let catalog = Catalog::load(file)?;
    for model in catalog.iter() {
        let plans = planner::check_all(model)?;
        println!(
            "OK: {} ({} sequences, {} optics, {} plans)",
            model.name(),
            model.model().sequences.len(),
            model.model().optics.len(),
            plans
        );
    }
    Ok(())
}

fn cmd_plan(
    file: &Path,
    model: Option<&str>,
    request: &PlanRequest,
    json: bool,
) -> Result<(), Error> {
    let catalog = Catalog::load(file)?;
    let resolved = catalog.select(model)?;
    let plan = planner::build_plan(resolved, request)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", render_plan(&plan));
    }
    Ok(())
}

/// Human-readable plan listing.
fn render_plan(plan: &LoadPlan) -> String {
    let mut out = format!(
        "Planning: {} (sequence {}, range {} [{} .. {}], optic {})\n\n",
        plan.model, plan.sequence, plan.range.name, plan.range.first, plan.range.last, plan.optic
    );
    for (i, action) in plan.actions.iter().enumerate() {
        out.push_str(&format!("  {:>3}. {}\n", i + 1, action));
    }
    out.push_str(&format!(
        "\nPlan: {} actions, {} files. Fingerprint {}\n",
        plan.actions.len(),
        plan.loaded_files().len(),
        plan.fingerprint()
    ));
    out
}

fn cmd_show(file: &Path, model: Option<&str>) -> Result<(), Error> {
    let catalog = Catalog::load(file)?;
    match model {
        Some(name) => print!("{}", render_model(catalog.get(name)?)),
        None => {
            for resolved in catalog.iter() {
                print!("{}", render_model(resolved));
            }
        }
    }
    Ok(())
}

fn render_model(resolved: &ResolvedModel) -> String {
    let model = resolved.model();
    let default_optic = resolved.optic(resolved.default_optic()).name.as_str();
    let default_sequence = resolved.sequence(resolved.default_sequence()).name.as_str();

    let mut out = model.name.clone();
    if let Some(rev) = &model.svn_revision {
        out.push_str(&format!(" ({})", rev));
    }
    out.push('\n');

    out.push_str("  optics:\n");
    for name in resolved.optic_names() {
        let marker = if name == default_optic { "*" } else { " " };
        out.push_str(&format!("   {} {}\n", marker, name));
    }

    out.push_str("  sequences:\n");
    for id in resolved.sequence_ids() {
        let seq = resolved.sequence(id);
        let marker = if seq.name == default_sequence { "*" } else { " " };
        out.push_str(&format!("   {} {}\n", marker, seq.name));
        out.push_str(&format!(
            "       beam: {}\n",
            format_params(&resolved.beam_for(id).params)
        ));
        let default_range = resolved.range(resolved.default_range(id)).name.as_str();
        for range in &seq.ranges {
            let marker = if range.name == default_range { "*" } else { " " };
            out.push_str(&format!(
                "       {} {} [{} .. {}]\n",
                marker, range.name, range.bounds.first, range.bounds.last
            ));
        }
    }

    let beams = resolved.beam_names();
    if !beams.is_empty() {
        out.push_str(&format!("  beams: {}\n", beams.join(", ")));
    }
    out
}
