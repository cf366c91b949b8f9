//! Training loop implementation for SN-GAN
//!
//! Each outer iteration runs `dis_iters` discriminator steps; the first of
//! them is preceded by one generator step against a frozen discriminator.
//! Both learning rates are scheduled once per outer iteration. Every 5000
//! iterations the loss buffers are logged and drained, the generator is
//! scored and a checkpoint is written.

use std::path::{Path, PathBuf};

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use tch::{nn, Device, Tensor};
use tracing::{debug, info};

use super::losses::LossType;
use super::metrics::{EvalRecord, TrainingMetrics};
use super::monitor::SingularValueMonitor;
use super::penalty::gradient_penalty;
use super::scheduler::LinearDecay;
use crate::data::BatchSource;
use crate::error::{GanError, Result};
use crate::eval::Evaluator;
use crate::model::{sample_c, sample_z, Labels, SnGan, DEFAULT_CLIP};
use crate::utils::{Checkpointer, TrainingConfig, TrainingState};

/// Gradient singular values are recorded every this many outer iterations
pub const SV_INTERVAL: usize = 50;
/// Evaluation and checkpoint period, in outer iterations
pub const EVAL_INTERVAL: usize = 5000;
/// At this iteration the evaluation uses 10x the images and splits
pub const FULL_EVAL_ITER: usize = 50000;

/// SN-GAN Trainer
pub struct Trainer {
    config: TrainingConfig,
    loss: LossType,
    device: Device,
    start_iter: usize,
    metrics: TrainingMetrics,
    monitor: SingularValueMonitor,
}

impl Trainer {
    /// Create a new trainer; an unknown `loss_type` fails here
    pub fn new(config: TrainingConfig, device: Device) -> Result<Self> {
        let loss = config.loss_type.parse::<LossType>()?;
        Ok(Self {
            config,
            loss,
            device,
            start_iter: 0,
            metrics: TrainingMetrics::new(),
            monitor: SingularValueMonitor::new(),
        })
    }

    /// Continue from `iteration` with a previously saved evaluation history
    pub fn resume_from(mut self, iteration: usize, metrics: TrainingMetrics) -> Self {
        self.start_iter = iteration;
        self.metrics = metrics;
        self
    }

    /// Train the SN-GAN model
    ///
    /// # Arguments
    ///
    /// * `gan` - Model to train, built with the class count implied by `conditional`
    /// * `data` - Infinite source of real batches
    /// * `evaluator` - Inception Score evaluation; skipped when `None`
    /// * `checkpointer` - Receives the training state at every evaluation
    pub fn train(
        &mut self,
        gan: &mut SnGan,
        data: &mut dyn BatchSource,
        mut evaluator: Option<&mut dyn Evaluator>,
        checkpointer: &mut dyn Checkpointer,
    ) -> anyhow::Result<&TrainingMetrics> {
        self.check_model(gan, data)?;

        if let Some(seed) = self.config.seed {
            tch::manual_seed(seed);
        }

        let results_path = PathBuf::from(&self.config.results_path);
        std::fs::create_dir_all(&results_path).with_context(|| {
            format!("Failed to create results directory {}", results_path.display())
        })?;
        let sv_path = results_path.join("sv_dump.json");
        let metrics_path = results_path.join("metrics.csv");

        let cfg = self.config.clone();
        let mut gen_opt = gan.gen_optimizer(cfg.gen_lr, cfg.beta1, cfg.beta2)?;
        let mut dis_opt = gan.dis_optimizer(cfg.dis_lr, cfg.beta1, cfg.beta2)?;
        let mut gen_scheduler =
            LinearDecay::new(cfg.gen_lr, cfg.max_iters, cfg.lr_decay).starting_at(self.start_iter);
        let mut dis_scheduler =
            LinearDecay::new(cfg.dis_lr, cfg.max_iters, cfg.lr_decay).starting_at(self.start_iter);
        gen_opt.set_lr(gen_scheduler.current_lr());
        dis_opt.set_lr(dis_scheduler.current_lr());

        self.monitor = SingularValueMonitor::for_layers(&gan.discriminator.monitored_layers());

        info!("Using device {:?}", self.device);
        info!(
            "Starting training: {} loss, iterations {}..{}, {} discriminator steps each",
            self.loss, self.start_iter, cfg.max_iters, cfg.dis_iters
        );

        let pb = if cfg.show_progress {
            ProgressBar::new(cfg.max_iters.saturating_sub(self.start_iter) as u64)
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
                .progress_chars("##-"),
        );

        let mut gen_loss = 0.0;
        let mut dis_loss = 0.0;

        for iters in self.start_iter..cfg.max_iters {
            for i in 0..cfg.dis_iters {
                if i == 0 {
                    gen_loss = self.generator_step(gan, &mut gen_opt)?;
                }
                let record_sv = iters % SV_INTERVAL == 0 && i == 0;
                dis_loss = self.discriminator_step(gan, &mut dis_opt, data, record_sv, &sv_path)?;
            }

            self.metrics.push_losses(gen_loss, dis_loss);
            gen_scheduler.step(&mut gen_opt);
            dis_scheduler.step(&mut dis_opt);

            pb.set_message(format!("G: {:.4}, D: {:.4}", gen_loss, dis_loss));
            pb.inc(1);

            if iters % EVAL_INTERVAL == 0 && iters != 0 {
                let (n_imgs, splits) = if iters == FULL_EVAL_ITER {
                    (cfg.n_is_imgs * 10, 10)
                } else {
                    (cfg.n_is_imgs, 1)
                };

                let mean_gen = self.metrics.mean_gen_loss();
                let mean_dis = self.metrics.mean_dis_loss();
                info!("Mean generator loss: {}", mean_gen);
                info!("Mean discriminator loss: {}", mean_dis);
                self.metrics.reset_buffers();

                let score = match evaluator.as_deref_mut() {
                    Some(evaluator) => {
                        let images = evaluator.generate_images(
                            &mut gan.generator,
                            n_imgs,
                            cfg.eval_batch_size,
                        )?;
                        let (mean, std) = evaluator.inception_score(&images, splits)?;
                        info!("Inception Score: {}+/-{}", mean, std);
                        pb.println(format!("Inception Score: {}+/-{}", mean, std));
                        Some((mean, std))
                    }
                    None => None,
                };

                self.metrics.record_evaluation(EvalRecord {
                    iteration: iters,
                    gen_loss: mean_gen,
                    dis_loss: mean_dis,
                    is_mean: score.map(|(mean, _)| mean),
                    is_std: score.map(|(_, std)| std),
                });
                self.metrics.save_csv(&metrics_path.to_string_lossy())?;

                checkpointer.save_checkpoint(&TrainingState {
                    iteration: iters,
                    gan,
                    metrics: &self.metrics,
                    gen_scheduler: &gen_scheduler,
                    dis_scheduler: &dis_scheduler,
                })?;
            }
        }

        pb.finish_with_message("done");
        info!(
            "Training complete. Final G_loss: {:.4}, D_loss: {:.4}",
            gen_loss, dis_loss
        );

        Ok(&self.metrics)
    }

    /// One generator update against a frozen discriminator
    ///
    /// The discriminator is trainable again on return, also on error.
    fn generator_step(&self, gan: &mut SnGan, opt: &mut nn::Optimizer) -> anyhow::Result<f64> {
        gan.freeze_discriminator();
        let result = self.frozen_generator_update(gan, opt);
        gan.unfreeze_discriminator();
        result
    }

    fn frozen_generator_update(
        &self,
        gan: &mut SnGan,
        opt: &mut nn::Optimizer,
    ) -> anyhow::Result<f64> {
        let n = self.config.noise_batch_size;
        let z = sample_z(n, false, DEFAULT_CLIP, self.device);
        let y_fake = sample_c(n, gan.n_classes(), self.device);
        let x_fake = gan.generator.forward_t(&z, &y_fake, true)?;
        let dis_fake = gan.discriminator.forward_t(&x_fake, &y_fake, true)?;
        let loss = self.loss.generator_loss(&dis_fake);

        opt.zero_grad();
        loss.backward();
        opt.step();

        Ok(loss.double_value(&[]))
    }

    /// One discriminator update on a real batch and a fresh fake batch of the same size
    fn discriminator_step(
        &mut self,
        gan: &mut SnGan,
        opt: &mut nn::Optimizer,
        data: &mut dyn BatchSource,
        record_sv: bool,
        sv_path: &Path,
    ) -> anyhow::Result<f64> {
        let (x_real, y_real) = data.next_batch()?;
        let x_real = x_real.to_device(self.device);
        let y_real = self.real_labels(y_real)?;
        let batch_size = x_real.size()[0];

        let dis_real = gan.discriminator.forward_t(&x_real, &y_real, true)?;

        let z = sample_z(batch_size, false, DEFAULT_CLIP, self.device);
        let y_fake = sample_c(batch_size, gan.n_classes(), self.device);
        let x_fake = tch::no_grad(|| gan.generator.forward_t(&z, &y_fake, true))?;
        let dis_fake = gan.discriminator.forward_t(&x_fake, &y_fake, true)?;

        let mut loss = self.loss.discriminator_loss(&dis_fake, &dis_real);
        if self.config.reparametrize {
            loss = loss + gan.discriminator.sum_gammas()?.square() * self.config.lam1;
        }
        if self.config.use_gp {
            let penalty =
                gradient_penalty(&mut gan.discriminator, &x_real, &x_fake, &y_real, true)?;
            loss = loss + penalty * self.config.lam2;
        }

        opt.zero_grad();
        loss.backward();
        if record_sv {
            let recorded = self
                .monitor
                .record_layers(&gan.discriminator.monitored_layers());
            self.monitor.flush(sv_path)?;
            debug!("Recorded gradient spectra of {} layers", recorded);
        }
        opt.step();

        Ok(loss.double_value(&[]))
    }

    fn real_labels(&self, labels: Option<Tensor>) -> anyhow::Result<Labels> {
        if !self.config.conditional {
            return Ok(Labels::Unconditional);
        }
        let labels = labels.ok_or_else(|| {
            GanError::Config("conditional training needs a labelled dataset".to_string())
        })?;
        Ok(Labels::Conditional(labels.to_device(self.device)))
    }

    /// The networks must be built for the class count the run implies
    fn check_model(&self, gan: &SnGan, data: &dyn BatchSource) -> Result<()> {
        let expected = if self.config.conditional {
            data.n_classes()
        } else {
            0
        };
        let dis_classes = gan.discriminator.n_classes();
        if gan.n_classes() != expected || dis_classes != expected {
            return Err(GanError::Config(format!(
                "conditional={} with a {}-class dataset needs n_classes={}, model has {} / {}",
                self.config.conditional,
                data.n_classes(),
                expected,
                gan.n_classes(),
                dis_classes
            )));
        }
        if self.config.reparametrize && !gan.discriminator.is_reparametrized() {
            return Err(GanError::NotReparametrized);
        }
        Ok(())
    }

    pub fn monitor(&self) -> &SingularValueMonitor {
        &self.monitor
    }
}
