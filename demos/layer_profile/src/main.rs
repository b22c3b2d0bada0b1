///
/// layer_profile -- layerstats example application that computes layer-resolved activation profiles
///
/// Reads a layer map, an optional mask and a number of fMRI runs (MGH/MGZ), averages the signal per
/// layer group and time group relative to a baseline, and writes the block statistics to a CSV file.
///
/// To run this application, run 'cargo run --release -- layer_profile.toml' in the demos/layer_profile directory.
///

use anyhow::{Context, Result};
use log::info;
use ndarray::Array4;
use serde::Deserialize;

use layerstats::{layer_averages_vs_time, read_mgh, recombine, AggregateResult, AggregationParams, IndexRange, LayerIndex};

#[derive(Debug, Deserialize)]
struct Config {
    layers: String,
    mask: Option<String>,
    runs: Vec<String>,
    layer_count: Option<usize>,
    output: String,
    aggregation: AggregationParams,
    recombine: Option<Recombine>,
}

#[derive(Debug, Deserialize)]
struct Recombine {
    layer_groups: Option<Vec<IndexRange>>,
    time_groups: Option<Vec<IndexRange>>,
}

fn load_config(path: &str) -> Result<Config> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Cannot read config file '{}'", path))?;
    toml::from_str(&text).with_context(|| format!("Invalid config file '{}'", path))
}

fn write_csv(path: &str, result: &AggregateResult) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&["first_layer", "last_layer", "first_time", "last_time", "mean", "std", "sem", "num"])?;
    for (_, block) in result.iter() {
        writer.write_record(&[
            block.layers.first.to_string(),
            block.layers.last.to_string(),
            block.times.first.to_string(),
            block.times.last.to_string(),
            block.mean.to_string(),
            block.std.to_string(),
            block.sem.to_string(),
            block.num.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    println!("=====[ layer_profile -- layerstats layer-resolved activation example application ]=====");

    let config_file = std::env::args().nth(1).unwrap_or_else(|| String::from("layer_profile.toml"));
    let config = load_config(&config_file)?;

    println!("Sorting voxels by layer...");
    let layers = read_mgh(&config.layers)?;
    let mask = match &config.mask {
        Some(path) => Some(read_mgh(path)?),
        None => None,
    };
    let index = LayerIndex::from_mgh(&layers, mask.as_ref(), config.layer_count)?;
    println!("Found {} voxels in {} layers.", index.num_voxels(), index.num_layers());

    println!("Loading {} runs...", config.runs.len());
    let runs = config
        .runs
        .iter()
        .map(|path| Ok(read_mgh(path)?.data_as_f32()?))
        .collect::<Result<Vec<Array4<f32>>>>()?;

    let mut result = layer_averages_vs_time(&runs, &index, &config.aggregation)?;
    if let Some(regroup) = &config.recombine {
        info!("Recombining groups: {:?}", regroup);
        result = recombine(&result, regroup.layer_groups.as_deref(), regroup.time_groups.as_deref())?;
    }
    println!("{}", result);

    write_csv(&config.output, &result)?;
    println!("Block statistics written to '{}'.", config.output);
    Ok(())
}
