//! Integration tests for the SN-GAN training loop

use std::collections::HashMap;
use std::path::Path;

use sngan_cifar10::data::ImageLoader;
use sngan_cifar10::eval::{generate_images, Evaluator};
use sngan_cifar10::model::{DiscriminatorConfig, Generator, GeneratorConfig, SnGan};
use sngan_cifar10::training::{Trainer, TrainingMetrics};
use sngan_cifar10::utils::{
    find_latest_checkpoint, load_checkpoint, Checkpointer, DirCheckpointer, TrainingConfig,
    TrainingState,
};
use sngan_cifar10::GanError;
use tch::{nn::VarStore, Device, Kind, Tensor};

/// Records every call instead of scoring
#[derive(Default)]
struct CountingEvaluator {
    calls: Vec<(i64, i64)>,
}

impl Evaluator for CountingEvaluator {
    fn generate_images(
        &mut self,
        generator: &mut Generator,
        n_images: i64,
        batch_size: i64,
    ) -> anyhow::Result<Tensor> {
        generate_images(generator, n_images, batch_size, Device::Cpu)
    }

    fn inception_score(&mut self, images: &Tensor, splits: i64) -> anyhow::Result<(f64, f64)> {
        self.calls.push((images.size()[0], splits));
        Ok((1.5, 0.25))
    }
}

#[derive(Default)]
struct CountingCheckpointer {
    iterations: Vec<usize>,
}

impl Checkpointer for CountingCheckpointer {
    fn save_checkpoint(&mut self, state: &TrainingState<'_>) -> anyhow::Result<()> {
        self.iterations.push(state.iteration);
        Ok(())
    }
}

fn tiny_loader(n_classes: i64) -> ImageLoader {
    tch::manual_seed(42);
    let images = Tensor::rand([8, 3, 32, 32], (Kind::Float, Device::Cpu)) * 2.0 - 1.0;
    let labels = Tensor::randint(n_classes.max(1), [8], (Kind::Int64, Device::Cpu));
    ImageLoader::new(images, labels, n_classes, 4, Device::Cpu)
        .unwrap()
        .with_seed(42)
}

fn tiny_gan(n_classes: i64) -> SnGan {
    SnGan::new(
        GeneratorConfig {
            channels: 8,
            n_classes,
            ..Default::default()
        },
        DiscriminatorConfig {
            channels: 8,
            n_classes,
            use_gamma: false,
        },
        Device::Cpu,
    )
}

fn tiny_config(results: &Path) -> TrainingConfig {
    TrainingConfig {
        data_batch_size: 4,
        noise_batch_size: 4,
        dis_iters: 1,
        max_iters: 1,
        loss_type: "hinge".to_string(),
        results_path: results.to_string_lossy().to_string(),
        n_is_imgs: 4,
        eval_batch_size: 2,
        show_progress: false,
        seed: Some(7),
        ..Default::default()
    }
}

fn snapshot(vs: &VarStore) -> HashMap<String, Tensor> {
    vs.variables()
        .into_iter()
        .filter(|(_, t)| t.requires_grad())
        .map(|(name, t)| (name, t.detach().copy()))
        .collect()
}

fn unchanged(vs: &VarStore, before: &HashMap<String, Tensor>) -> Vec<String> {
    let after = vs.variables();
    before
        .iter()
        .filter(|(name, old)| after[name.as_str()].equal(old))
        .map(|(name, _)| name.clone())
        .collect()
}

#[test]
fn test_single_step_updates_every_parameter() {
    let dir = tempfile::tempdir().unwrap();
    let mut gan = tiny_gan(0);
    let gen_before = snapshot(&gan.gen_vs);
    let dis_before = snapshot(&gan.dis_vs);
    assert!(!gen_before.is_empty() && !dis_before.is_empty());

    let mut trainer = Trainer::new(tiny_config(dir.path()), Device::Cpu).unwrap();
    let mut evaluator = CountingEvaluator::default();
    let mut checkpointer = CountingCheckpointer::default();

    let metrics = trainer
        .train(
            &mut gan,
            &mut tiny_loader(10),
            Some(&mut evaluator),
            &mut checkpointer,
        )
        .unwrap();
    assert_eq!(metrics.buffered(), 1);

    assert_eq!(unchanged(&gan.gen_vs, &gen_before), Vec::<String>::new());
    assert_eq!(unchanged(&gan.dis_vs, &dis_before), Vec::<String>::new());

    // iteration 0 never evaluates
    assert!(evaluator.calls.is_empty());
    assert!(checkpointer.iterations.is_empty());
    assert!(dir.path().join("sv_dump.json").exists());

    // discriminator is trainable again after the generator step
    assert!(gan
        .dis_vs
        .trainable_variables()
        .iter()
        .all(|t| t.requires_grad()));
}

#[test]
fn test_unknown_loss_fails_before_training() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        loss_type: "least_squares".to_string(),
        ..tiny_config(dir.path())
    };

    match Trainer::new(config, Device::Cpu) {
        Err(GanError::UnknownLoss(name)) => assert_eq!(name, "least_squares"),
        other => panic!("expected UnknownLoss, got {:?}", other.err()),
    }
    assert!(!dir.path().join("sv_dump.json").exists());
}

#[test]
fn test_conditional_run_with_gradient_penalty() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        conditional: true,
        use_gp: true,
        loss_type: "stdgan".to_string(),
        dis_iters: 2,
        max_iters: 2,
        ..tiny_config(dir.path())
    };
    let mut gan = tiny_gan(10);
    let mut trainer = Trainer::new(config, Device::Cpu).unwrap();

    let metrics = trainer
        .train(
            &mut gan,
            &mut tiny_loader(10),
            None,
            &mut CountingCheckpointer::default(),
        )
        .unwrap();
    assert_eq!(metrics.buffered(), 2);
    assert!(metrics.mean_dis_loss().is_finite());
    assert!(metrics.mean_gen_loss().is_finite());
}

#[test]
fn test_evaluation_writes_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        max_iters: 5001,
        ..tiny_config(dir.path())
    };
    let mut gan = tiny_gan(0);
    let mut trainer =
        Trainer::new(config, Device::Cpu).unwrap().resume_from(5000, TrainingMetrics::new());
    let mut evaluator = CountingEvaluator::default();
    let mut checkpointer = DirCheckpointer::new(dir.path());

    let metrics = trainer
        .train(
            &mut gan,
            &mut tiny_loader(10),
            Some(&mut evaluator),
            &mut checkpointer,
        )
        .unwrap();

    assert_eq!(evaluator.calls, vec![(4, 1)]);
    assert_eq!(metrics.buffered(), 0);
    let record = metrics.latest_evaluation().unwrap();
    assert_eq!(record.iteration, 5000);
    assert_eq!(record.is_mean, Some(1.5));
    assert!(dir.path().join("metrics.csv").exists());

    let latest = find_latest_checkpoint(dir.path()).unwrap();
    assert!(latest.ends_with("checkpoint_iter_005000"));

    let mut restored = tiny_gan(0);
    let (meta, history) = load_checkpoint(&mut restored, &latest).unwrap();
    assert_eq!(meta.iteration, 5000);
    assert_eq!(history.evaluations.len(), 1);
    assert!((restored.checksum() - gan.checksum()).abs() < 1e-6);
}

#[test]
fn test_final_evaluation_uses_ten_times_the_images() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        max_iters: 50001,
        ..tiny_config(dir.path())
    };
    let mut gan = tiny_gan(0);
    let mut trainer =
        Trainer::new(config, Device::Cpu).unwrap().resume_from(50000, TrainingMetrics::new());
    let mut evaluator = CountingEvaluator::default();
    let mut checkpointer = CountingCheckpointer::default();

    trainer
        .train(
            &mut gan,
            &mut tiny_loader(10),
            Some(&mut evaluator),
            &mut checkpointer,
        )
        .unwrap();

    assert_eq!(evaluator.calls, vec![(40, 10)]);
    assert_eq!(checkpointer.iterations, vec![50000]);
}

#[test]
fn test_evaluation_without_evaluator_still_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let config = TrainingConfig {
        max_iters: 5001,
        ..tiny_config(dir.path())
    };
    let mut gan = tiny_gan(0);
    let mut trainer =
        Trainer::new(config, Device::Cpu).unwrap().resume_from(5000, TrainingMetrics::new());
    let mut checkpointer = CountingCheckpointer::default();

    let metrics = trainer
        .train(&mut gan, &mut tiny_loader(10), None, &mut checkpointer)
        .unwrap();

    assert_eq!(checkpointer.iterations, vec![5000]);
    assert_eq!(metrics.latest_evaluation().unwrap().is_mean, None);
}
