// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use cliptrack::audio;
use cliptrack::clock::ThreadClock;
use cliptrack::config::SamplerConfig;
use cliptrack::sampler::SampleLoader;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How often `play` checks whether everything has finished.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A sample-accurate clip player."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Parses a sampler configuration, loads its samples and reports any problems.
    Verify {
        /// The path to the sampler configuration.
        config: PathBuf,
    },
    /// Plays every sequence in a sampler configuration.
    Play {
        /// The path to the sampler configuration.
        config: PathBuf,
        /// Overrides the device named in the configuration.
        #[clap(long)]
        device: Option<String>,
    },
}

fn base_path(config: &Path) -> PathBuf {
    config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Verify { config } => {
            let sampler_config = SamplerConfig::deserialize(&config)?;
            let scheduler = sampler_config.scheduler()?;
            scheduler.validate()?;

            let base = base_path(&config);
            let mut loader = SampleLoader::new(sampler_config.sample_rate());
            let mut names: Vec<&String> = sampler_config.samples().keys().collect();
            names.sort();
            println!("Samples (count: {}):", names.len());
            for name in names {
                let definition = &sampler_config.samples()[name];
                let buffer =
                    loader.load(&SamplerConfig::sample_path(&base, &definition.file))?;
                println!(
                    "- {} ({} channels, {:.3}s, gain {})",
                    name,
                    buffer.channel_count(),
                    buffer.duration(),
                    definition.gain.unwrap_or(1.0)
                );
            }
            println!(
                "Instruments: {}, sequences: {}, sample memory: {} KiB",
                sampler_config.instruments().len(),
                sampler_config.sequences().len(),
                loader.total_memory_usage() / 1024
            );

            let problems = sampler_config.problems();
            if !problems.is_empty() {
                println!("Problems:");
                for problem in problems.iter() {
                    println!("- {}", problem);
                }
                return Err(format!(
                    "{} problems found in {}",
                    problems.len(),
                    config.display()
                )
                .into());
            }
            println!("Configuration OK.");
        }
        Commands::Play { config, device } => {
            let sampler_config = SamplerConfig::deserialize(&config)?;
            let device_name = device.unwrap_or_else(|| sampler_config.device().to_string());
            let device = audio::get_device(&device_name, sampler_config.output_format())?;
            info!(device = %device, "Opened device.");

            let sampler = sampler_config.init_sampler(
                &base_path(&config),
                device.port(),
                Box::new(ThreadClock::new()),
            )?;
            let count = sampler.play()?;
            println!("Scheduled {} events on {}.", count, device);

            while !sampler.scheduler().is_idle() {
                thread::sleep(IDLE_POLL_INTERVAL);
            }
            println!(
                "Finished. At most {} segments played at once.",
                sampler.scheduler().max_active_count()
            );
            sampler.dispose();
        }
    }

    Ok(())
}
