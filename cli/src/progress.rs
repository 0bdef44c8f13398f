use indicatif::{ProgressBar, ProgressStyle};
use neural_style::{Error, GeneratorProgress, ProgressUpdate};
use std::path::PathBuf;

struct Snapshots {
    every: u32,
    dir: PathBuf,
}

impl Snapshots {
    fn save(&self, iteration: usize, image: &neural_style::image::RgbImage) -> Result<(), Error> {
        std::fs::create_dir_all(&self.dir)?;
        image.save(self.dir.join(format!("{:05}.png", iteration)))?;
        Ok(())
    }
}

/// Shows a progress bar and/or saves intermediate images
pub struct ProgressReporter {
    bar: Option<ProgressBar>,
    total_len: usize,
    snapshots: Option<Snapshots>,
}

impl ProgressReporter {
    pub fn new(show_bar: bool, snapshots: Option<(u32, PathBuf)>) -> Self {
        let bar = if show_bar {
            let pb = ProgressBar::new(100);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>4}/{len} {msg}")
                    .progress_chars("##-"),
            );
            Some(pb)
        } else {
            None
        };

        Self {
            bar,
            total_len: 100,
            snapshots: snapshots.map(|(every, dir)| Snapshots { every, dir }),
        }
    }

    /// Whether there is anything to report to
    pub fn is_active(&self) -> bool {
        self.bar.is_some() || self.snapshots.is_some()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(ref bar) = self.bar {
            bar.finish();
        }
    }
}

impl GeneratorProgress for ProgressReporter {
    fn update(&mut self, update: ProgressUpdate<'_>) {
        if let Some(ref bar) = self.bar {
            if update.total.total != self.total_len {
                self.total_len = update.total.total;
                bar.set_length(self.total_len as u64);
            }

            bar.set_position(update.total.current as u64);
            bar.set_message(&format!(
                "content {:.3e} style {:.3e}",
                update.content_score, update.style_score
            ));
        }

        if let Some(ref snapshots) = self.snapshots {
            let iteration = update.total.current;
            if iteration % snapshots.every as usize == 0 {
                // snapshots are best effort
                if let Err(err) = snapshots.save(iteration, update.image) {
                    log::warn!("failed to save snapshot {}: {}", iteration, err);
                }
            }
        }
    }
}
