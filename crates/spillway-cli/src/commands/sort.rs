use crate::{OutputFormat, SortArgs};
use anyhow::{Context, bail};
use futures::future::join_all;
use spillway_disk::{
    CancellationFlag, ChannelProvider, Comparator, ExternalSorter, FileIoManager, MergeSlots,
    SpillConfig, SpillError, Utf8Codec, comparator, natural_order,
};
use spillway_options::Options;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of sorting one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileSummary {
    input: PathBuf,
    output: PathBuf,
    records: u64,
    spills: usize,
    intermediate_passes: usize,
}

/// Everything one blocking sort task needs.
struct SortJob {
    input: PathBuf,
    output: PathBuf,
    config: SpillConfig,
    provider: Arc<dyn ChannelProvider>,
    comparator: Comparator<String>,
    slots: Option<Arc<MergeSlots>>,
    cancel: CancellationFlag,
}

pub async fn handle(
    args: SortArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let config = build_config(&args, config_path)?;
    let provider: Arc<dyn ChannelProvider> = Arc::new(FileIoManager::new(&config.temp_dirs)?);
    let comparator = line_comparator(args.numeric, args.reverse);
    let slots = config.merge_slots();
    let cancel = CancellationFlag::new();

    if let Some(dir) = &args.output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    }

    let mut jobs = Vec::with_capacity(args.inputs.len());
    for input in &args.inputs {
        jobs.push(SortJob {
            input: input.clone(),
            output: output_path(input, args.output_dir.as_deref())?,
            config: config.clone(),
            provider: Arc::clone(&provider),
            comparator: Arc::clone(&comparator),
            slots: slots.clone(),
            cancel: cancel.clone(),
        });
    }

    let tasks = jobs.into_iter().map(|job| {
        let input = job.input.clone();
        let on_panic = job.cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let cancel = job.cancel.clone();
            let result = sort_file(job);
            if result.is_err() {
                cancel.cancel();
            }
            result
        });
        async move {
            let result = handle
                .await
                .with_context(|| format!("Sort task for {} failed", input.display()));
            if result.is_err() {
                on_panic.cancel();
            }
            result?
        }
    });

    // Wait for every file so cancelled sorts have deleted their channels
    // before the error is reported.
    let mut summaries = Vec::with_capacity(tasks.len());
    let mut failure: Option<anyhow::Error> = None;
    for result in join_all(tasks).await {
        match result {
            Ok(summary) => summaries.push(summary),
            Err(e) => {
                cancel.cancel();
                if failure.as_ref().is_none_or(is_cancellation) {
                    failure = Some(e);
                }
            }
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }

    print_summaries(&summaries, format)
}

fn is_cancellation(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<SpillError>(), Some(SpillError::Cancelled))
}

fn build_config(args: &SortArgs, config_path: Option<&Path>) -> anyhow::Result<SpillConfig> {
    let options = match config_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Options::from_toml_str(&text)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => Options::new(),
    };
    let mut config = SpillConfig::from_options(&options)?;

    if let Some(size) = args.block_size {
        config.block_size = usize::try_from(size.bytes()).context("Block size too large")?;
    }
    if let Some(fan_in) = args.fan_in {
        config.merge_fan_in = fan_in;
    }
    if let Some(memory) = args.memory {
        config.memory_threshold = usize::try_from(memory.bytes()).context("Memory limit too large")?;
    }
    if !args.tmp_dirs.is_empty() {
        config.temp_dirs.clone_from(&args.tmp_dirs);
    }

    config.validate()?;
    Ok(config)
}

fn line_comparator(numeric: bool, reverse: bool) -> Comparator<String> {
    match (numeric, reverse) {
        (false, false) => natural_order(),
        (false, true) => comparator(|a: &String, b: &String| b.cmp(a)),
        (true, false) => {
            comparator(|a: &String, b: &String| numeric_key(a).total_cmp(&numeric_key(b)))
        }
        (true, true) => {
            comparator(|a: &String, b: &String| numeric_key(b).total_cmp(&numeric_key(a)))
        }
    }
}

/// Lines that are not numbers sort as zero.
fn numeric_key(line: &str) -> f64 {
    line.trim().parse().unwrap_or(0.0)
}

fn output_path(input: &Path, output_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let Some(name) = input.file_name() else {
        bail!("Input {} has no file name", input.display());
    };
    let mut name = name.to_os_string();
    name.push(".sorted");
    Ok(match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    })
}

fn sort_file(job: SortJob) -> anyhow::Result<FileSummary> {
    let mut sorter = ExternalSorter::new(job.config, job.provider, Utf8Codec, job.comparator)?
        .with_cancellation(job.cancel);
    if let Some(slots) = job.slots {
        sorter = sorter.with_merge_slots(slots);
    }

    let reader = BufReader::new(
        File::open(&job.input)
            .with_context(|| format!("Failed to open {}", job.input.display()))?,
    );
    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read {}", job.input.display()))?;
        sorter.add(line)?;
    }

    let sorted = sorter.finish()?;
    let stats = sorted.stats();

    let file = File::create(&job.output)
        .with_context(|| format!("Failed to create {}", job.output.display()))?;
    let mut writer = BufWriter::new(file);
    for record in sorted {
        writeln!(writer, "{}", record?)?;
    }
    writer.flush()?;

    info!(
        "Sorted {} into {} ({} records, {} spills)",
        job.input.display(),
        job.output.display(),
        stats.records,
        stats.spills
    );
    Ok(FileSummary {
        input: job.input,
        output: job.output,
        records: stats.records,
        spills: stats.spills,
        intermediate_passes: stats.merge.intermediate_passes,
    })
}

fn print_summaries(summaries: &[FileSummary], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let output: Vec<_> = summaries
                .iter()
                .map(|summary| {
                    serde_json::json!({
                        "input": summary.input.display().to_string(),
                        "output": summary.output.display().to_string(),
                        "records": summary.records,
                        "spills": summary.spills,
                        "intermediate_passes": summary.intermediate_passes,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for summary in summaries {
                println!(
                    "{} -> {}: {} records, {} spills, {} intermediate merge passes",
                    summary.input.display(),
                    summary.output.display(),
                    summary.records,
                    summary.spills,
                    summary.intermediate_passes
                );
            }
        }
    }
    if summaries.is_empty() {
        warn!("No input files were sorted");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cmp::Ordering;

    fn args(inputs: Vec<PathBuf>) -> SortArgs {
        SortArgs {
            inputs,
            output_dir: None,
            block_size: None,
            fan_in: None,
            memory: None,
            tmp_dirs: Vec::new(),
            numeric: false,
            reverse: false,
        }
    }

    #[test]
    fn test_line_comparators() {
        let (ten, nine) = ("10".to_string(), "9".to_string());
        assert_eq!(line_comparator(false, false)(&ten, &nine), Ordering::Less);
        assert_eq!(line_comparator(true, false)(&ten, &nine), Ordering::Greater);
        assert_eq!(line_comparator(true, true)(&ten, &nine), Ordering::Less);
        assert_eq!(line_comparator(false, true)(&ten, &nine), Ordering::Greater);

        let text = "abc".to_string();
        let zero = "0".to_string();
        assert_eq!(line_comparator(true, false)(&text, &zero), Ordering::Equal);
    }

    #[test]
    fn test_output_path() {
        let input = Path::new("/data/lines.txt");
        assert_eq!(
            output_path(input, None).unwrap(),
            PathBuf::from("/data/lines.txt.sorted")
        );
        assert_eq!(
            output_path(input, Some(Path::new("/out"))).unwrap(),
            PathBuf::from("/out/lines.txt.sorted")
        );
        assert!(output_path(Path::new("/"), None).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("spill.toml");
        fs::write(
            &config_file,
            "page-size = \"4 kb\"\nsort-spill-buffer-size = \"1 mb\"\n\n[local-sort]\nmax-num-file-handles = 16\n",
        )
        .unwrap();

        let mut sort_args = args(vec![PathBuf::from("in.txt")]);
        sort_args.fan_in = Some(3);
        let config = build_config(&sort_args, Some(&config_file)).unwrap();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.memory_threshold, 1024 * 1024);
        assert_eq!(config.merge_fan_in, 3);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut sort_args = args(vec![PathBuf::from("in.txt")]);
        sort_args.fan_in = Some(1);
        assert!(build_config(&sort_args, None).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_input_waits_for_other_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("numbers.txt");
        let lines: Vec<String> = (0..5_000).rev().map(|i| i.to_string()).collect();
        fs::write(&input, lines.join("\n")).unwrap();
        let spill_dir = dir.path().join("spill");

        let mut sort_args = args(vec![input, dir.path().join("missing.txt")]);
        sort_args.memory = Some("64".parse().unwrap());
        sort_args.block_size = Some("64".parse().unwrap());
        sort_args.tmp_dirs = vec![spill_dir.clone()];

        let err = handle(sort_args, None, OutputFormat::Text).await.unwrap_err();
        assert!(err.to_string().contains("Failed to open"), "{err:#}");
        assert_eq!(fs::read_dir(&spill_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_is_cancellation() {
        assert!(is_cancellation(&anyhow::Error::from(SpillError::Cancelled)));
        assert!(!is_cancellation(&anyhow::anyhow!("Failed to open input")));
    }

    #[test]
    fn test_sort_file_with_spills() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("words.txt");
        fs::write(&input, "pear\napple\nfig\nkiwi\nbanana\ncherry\n").unwrap();
        let output = dir.path().join("words.txt.sorted");

        let spill_dir = dir.path().join("spill");
        let io = Arc::new(FileIoManager::new(&[&spill_dir]).unwrap());
        let summary = sort_file(SortJob {
            input,
            output: output.clone(),
            config: SpillConfig::default()
                .with_block_size(64)
                .with_merge_fan_in(2)
                .with_memory_threshold(8),
            provider: io.clone(),
            comparator: natural_order(),
            slots: None,
            cancel: CancellationFlag::new(),
        })
        .unwrap();

        assert_eq!(summary.records, 6);
        assert!(summary.spills > 1);
        assert_eq!(
            fs::read_to_string(output).unwrap(),
            "apple\nbanana\ncherry\nfig\nkiwi\npear\n"
        );
        assert!(io.channel_files().unwrap().is_empty());
    }
}
