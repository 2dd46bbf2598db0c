//! # HighRes-MT Network
//!
//! A multi-task HighRes3DNet. The first convolution splits its output kernels
//! into task-1, shared and task-2 streams. Three residual stages (dilation 1, 2
//! and 4) run every stream through its own blocks and merge after each stage:
//!
//! ```text
//! task_1 = r_task_1 + r_shared
//! shared = r_shared
//! task_2 = r_task_2 + r_shared
//! ```
//!
//! A second grouped 1x1x1 convolution regroups the three streams, and one
//! classification head per task produces the logits.

use burn::{module::Ignored, prelude::*};
use highres_mt_loss::{SegmentationLoss, SegmentationLossConfig};

use crate::{
    config::{AnnealingConfig, LayerSpecs, ModelConfig, Stream},
    error::{ModelError, ModelResult},
    layers::{
        CategoricalSampling, ConvolutionalLayer, ConvolutionalLayerConfig, GroupedFlow,
        HighResBlock, HighResBlockConfig, LearnedCategoricalGroupConv,
        LearnedCategoricalGroupConvConfig,
    },
    training::{MultiTaskBatch, MultiTaskOutput},
};

/// Configuration for the [`HighResMtNet`] model.
#[derive(Config, Debug)]
pub struct HighResMtNetConfig {
    /// The detailed model configuration.
    pub config: ModelConfig,
}

impl HighResMtNetConfig {
    /// Initializes a [`HighResMtNet`] with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn init<B: Backend>(&self, device: &B::Device) -> ModelResult<HighResMtNet<B>> {
        let config = &self.config;
        config.validate()?;
        let layers = &config.layers;

        let conv_0 = LearnedCategoricalGroupConvConfig::new(
            config.in_channels,
            layers.conv_0.n_features,
        )
        .with_kernel_size(layers.conv_0.kernel_size)
        .with_categorical(config.categorical.clone())
        .with_acti_func(config.acti_func.clone())
        .init(device)?;

        let mut in_channels = layers.conv_0.n_features;
        let mut stages = Vec::with_capacity(layers.residual.len());
        for spec in &layers.residual {
            let streams = Stream::ALL
                .iter()
                .map(|_| {
                    (0..spec.repeat)
                        .map(|j| {
                            let block_in = if j == 0 { in_channels } else { spec.n_features };
                            HighResBlockConfig::new(block_in, spec.n_features)
                                .with_kernels(spec.kernels.clone())
                                .with_dilation(spec.dilation)
                                .with_acti_func(config.acti_func.clone())
                                .init(device)
                        })
                        .collect()
                })
                .collect();
            stages.push(ResidualStage { streams });
            in_channels = spec.n_features;
        }

        let conv_1 = LearnedCategoricalGroupConvConfig::new(in_channels, layers.conv_1.n_features)
            .with_kernel_size(layers.conv_1.kernel_size)
            .with_grouped_input(true)
            .with_categorical(config.categorical.clone())
            .with_acti_func(config.acti_func.clone())
            .init(device)?;

        let head = ConvolutionalLayerConfig::new(layers.conv_1.n_features, config.num_classes)
            .with_kernel_size(layers.head_kernel_size)
            .with_acti_func(config.acti_func.clone());

        let loss = SegmentationLossConfig::new(config.num_classes)
            .with_loss_type(config.loss_type.clone())
            .with_loss_params(config.loss_params.clone())
            .init()?;

        let model = HighResMtNet {
            conv_0,
            stages,
            conv_1,
            head_task_1: head.init(device),
            head_task_2: head.init(device),
            loss,
            in_channels: config.in_channels,
            spatial_divisor: config.spatial_divisor,
            task_weights: Ignored(config.task_weights),
            layers: Ignored(layers.clone()),
            annealing: Ignored(config.annealing.clone()),
        };
        tracing::debug!(
            num_params = model.num_params(),
            num_classes = config.num_classes,
            "initialised HighRes-MT network"
        );

        Ok(model)
    }
}

/// One residual stage: `repeat` blocks per stream, each stream with its own weights.
#[derive(Module, Debug)]
pub struct ResidualStage<B: Backend> {
    /// Indexed by [`Stream::index`].
    streams: Vec<Vec<HighResBlock<B>>>,
}

impl<B: Backend> ResidualStage<B> {
    fn forward(
        &self,
        streams: [Tensor<B, 5>; 3],
        name: &str,
        mut trace: Option<&mut Vec<LayerOutput<B>>>,
    ) -> [Tensor<B, 5>; 3] {
        let [x_1, x_s, x_2] = streams;
        let r_1 = self.forward_stream(Stream::Task1, x_1, name, trace.as_deref_mut());
        let r_s = self.forward_stream(Stream::Shared, x_s, name, trace.as_deref_mut());
        let r_2 = self.forward_stream(Stream::Task2, x_2, name, trace.as_deref_mut());

        [r_1 + r_s.clone(), r_s.clone(), r_2 + r_s]
    }

    fn forward_stream(
        &self,
        stream: Stream,
        x: Tensor<B, 5>,
        name: &str,
        mut trace: Option<&mut Vec<LayerOutput<B>>>,
    ) -> Tensor<B, 5> {
        let mut x = x;
        for (j, block) in self.streams[stream.index()].iter().enumerate() {
            x = block.forward(x);
            if let Some(trace) = trace.as_deref_mut() {
                trace.push(LayerOutput {
                    name: format!("{name}_{j}/{}", stream.name()),
                    flow: GroupedFlow::Single(x.clone()),
                });
            }
        }
        x
    }

    fn repeat(&self) -> usize {
        self.streams.first().map_or(0, Vec::len)
    }
}

/// Logits of both tasks together with the categorical masks of every grouped
/// layer, in network order.
#[derive(Debug, Clone)]
pub struct HighResMtOutput<B: Backend> {
    /// `[batch_size, num_classes, depth, height, width]`
    pub task_1: Tensor<B, 5>,
    /// `[batch_size, num_classes, depth, height, width]`
    pub task_2: Tensor<B, 5>,
    /// Sampled masks, `[out_channels, 3]` each.
    pub masks: Vec<Tensor<B, 2>>,
    /// Group probabilities, `[out_channels, 3]` each.
    pub probabilities: Vec<Tensor<B, 2>>,
}

/// A named intermediate activation.
#[derive(Debug, Clone)]
pub struct LayerOutput<B: Backend> {
    pub name: String,
    pub flow: GroupedFlow<B>,
}

/// The multi-task HighRes3DNet model.
#[derive(Module, Debug)]
pub struct HighResMtNet<B: Backend> {
    conv_0: LearnedCategoricalGroupConv<B>,
    stages: Vec<ResidualStage<B>>,
    conv_1: LearnedCategoricalGroupConv<B>,
    head_task_1: ConvolutionalLayer<B>,
    head_task_2: ConvolutionalLayer<B>,
    loss: SegmentationLoss<B>,
    in_channels: usize,
    spatial_divisor: usize,
    task_weights: Ignored<[f64; 2]>,
    layers: Ignored<LayerSpecs>,
    annealing: Ignored<AnnealingConfig>,
}

impl<B: Backend> HighResMtNet<B> {
    /// Forward pass through the whole network.
    ///
    /// # Shapes
    /// * `images` - `[batch_size, in_channels, depth, height, width]`
    /// * Returns - logits `[batch_size, num_classes, depth, height, width]` per task
    ///
    /// # Errors
    ///
    /// Returns `Err(ModelError::InvalidTensorShape)` if the channel count is
    /// wrong or a spatial dimension is not divisible by the spatial divisor.
    pub fn forward(
        &self,
        images: Tensor<B, 5>,
        sampling: CategoricalSampling,
    ) -> ModelResult<HighResMtOutput<B>> {
        self.run(images, sampling, None)
    }

    /// Every named intermediate activation, in creation order.
    ///
    /// The list starts with `conv_0`, continues with every residual block of
    /// every stream (`res_1_0/task_1`, ...), then `conv_1`, and ends with the
    /// `conv_2/task_1` and `conv_2/task_2` logits.
    ///
    /// # Errors
    ///
    /// See [`HighResMtNet::forward`].
    pub fn layer_outputs(
        &self,
        images: Tensor<B, 5>,
        sampling: CategoricalSampling,
    ) -> ModelResult<Vec<LayerOutput<B>>> {
        let mut trace = Vec::new();
        self.run(images, sampling, Some(&mut trace))?;
        Ok(trace)
    }

    /// Inference output of a single layer, negative ids counting from the end
    /// (`-1` is the task-2 logits).
    ///
    /// # Errors
    ///
    /// Returns `Err(ModelError::LayerOutOfRange)` for an unknown layer id.
    pub fn forward_layer(&self, images: Tensor<B, 5>, layer_id: isize) -> ModelResult<GroupedFlow<B>> {
        let outputs = self.layer_outputs(images, CategoricalSampling::Deterministic)?;
        let num_layers = outputs.len();
        let index = if layer_id < 0 {
            num_layers as isize + layer_id
        } else {
            layer_id
        };

        usize::try_from(index)
            .ok()
            .and_then(|index| outputs.into_iter().nth(index))
            .map(|output| output.flow)
            .ok_or(ModelError::LayerOutOfRange {
                layer_id,
                num_layers,
            })
    }

    /// Forward pass followed by both task losses.
    ///
    /// The batch weight map, when present, weights the voxels of both tasks.
    /// The network predicts no noise map, so the heteroscedastic loss sees
    /// none.
    ///
    /// # Errors
    ///
    /// Returns an error if the forward pass or the loss computation fails.
    pub fn forward_loss(
        &self,
        batch: MultiTaskBatch<B>,
        sampling: CategoricalSampling,
    ) -> ModelResult<MultiTaskOutput<B>> {
        let output = self.forward(batch.images, sampling)?;

        let task_1_loss = self.loss.forward_single(
            output.task_1.clone(),
            batch.task_1_labels,
            None,
            batch.weight_map.clone(),
        )?;
        let task_2_loss = self.loss.forward_single(
            output.task_2.clone(),
            batch.task_2_labels,
            None,
            batch.weight_map,
        )?;

        let [weight_1, weight_2] = self.task_weights.0;
        let loss = task_1_loss.clone().mul_scalar(weight_1) + task_2_loss.clone().mul_scalar(weight_2);

        Ok(MultiTaskOutput::new(
            loss,
            task_1_loss,
            task_2_loss,
            output.task_1,
            output.task_2,
        ))
    }

    /// Gumbel sampling at the annealed temperature of `iteration`.
    pub fn training_sampling(&self, iteration: usize) -> CategoricalSampling {
        CategoricalSampling::Gumbel {
            temperature: self.annealing.0.temperature(iteration),
        }
    }

    /// Human-readable list of layers.
    pub fn summary(&self) -> String {
        let layers = &self.layers.0;
        let mut lines = vec![format!("HighResMtNet ({} parameters)", self.num_params())];

        lines.push(format!(
            "  {}: grouped conv {} -> {}, kernel {}, groups {:?}",
            layers.conv_0.name,
            self.in_channels,
            self.conv_0.out_channels(),
            layers.conv_0.kernel_size,
            self.conv_0.group_counts(),
        ));
        for (stage, spec) in self.stages.iter().zip(&layers.residual) {
            lines.push(format!(
                "  {}: 3 streams x {} HighResBlock({} features, kernels {:?}, dilation {})",
                spec.name,
                stage.repeat(),
                spec.n_features,
                spec.kernels,
                spec.dilation,
            ));
        }
        lines.push(format!(
            "  {}: grouped conv x3 -> {}, kernel {}, groups {:?}",
            layers.conv_1.name,
            self.conv_1.out_channels(),
            layers.conv_1.kernel_size,
            self.conv_1.group_counts(),
        ));
        lines.push(format!(
            "  conv_2: task_1 head -> {}, task_2 head -> {}, kernel {}",
            self.head_task_1.out_channels(),
            self.head_task_2.out_channels(),
            layers.head_kernel_size,
        ));
        lines.push(format!(
            "  loss: {} (task weights {:?})",
            self.loss.loss_type().name(),
            self.task_weights.0
        ));

        lines.join("\n")
    }

    fn check_input(&self, images: &Tensor<B, 5>) -> ModelResult<()> {
        let dims = images.dims();
        if dims[1] != self.in_channels {
            return Err(ModelError::InvalidTensorShape {
                expected: format!("[batch, {}, depth, height, width]", self.in_channels),
                actual: format!("{dims:?}"),
            });
        }
        if dims[2..].iter().any(|size| size % self.spatial_divisor != 0) {
            return Err(ModelError::InvalidTensorShape {
                expected: format!("spatial dimensions divisible by {}", self.spatial_divisor),
                actual: format!("{dims:?}"),
            });
        }

        Ok(())
    }

    fn run(
        &self,
        images: Tensor<B, 5>,
        sampling: CategoricalSampling,
        mut trace: Option<&mut Vec<LayerOutput<B>>>,
    ) -> ModelResult<HighResMtOutput<B>> {
        self.check_input(&images)?;
        let layers = &self.layers.0;
        let mut masks = Vec::with_capacity(2);
        let mut probabilities = Vec::with_capacity(2);

        let conv_0 = self.conv_0.forward(GroupedFlow::Single(images), sampling)?;
        record(&mut trace, &layers.conv_0.name, &conv_0.flow);
        masks.push(conv_0.mask);
        probabilities.push(conv_0.probabilities);
        let mut streams = into_streams(conv_0.flow, &layers.conv_0.name)?;

        for (stage, spec) in self.stages.iter().zip(&layers.residual) {
            streams = stage.forward(streams, &spec.name, trace.as_deref_mut());
        }

        let conv_1 = self.conv_1.forward(GroupedFlow::Streams(streams), sampling)?;
        record(&mut trace, &layers.conv_1.name, &conv_1.flow);
        masks.push(conv_1.mask);
        probabilities.push(conv_1.probabilities);

        let task_1 = self.head_task_1.forward(conv_1.flow.stream(Stream::Task1));
        let task_2 = self.head_task_2.forward(conv_1.flow.stream(Stream::Task2));
        if let Some(trace) = trace.as_deref_mut() {
            for (stream, logits) in [(Stream::Task1, &task_1), (Stream::Task2, &task_2)] {
                trace.push(LayerOutput {
                    name: format!("conv_2/{}", stream.name()),
                    flow: GroupedFlow::Single(logits.clone()),
                });
            }
        }

        Ok(HighResMtOutput {
            task_1,
            task_2,
            masks,
            probabilities,
        })
    }
}

fn record<B: Backend>(
    trace: &mut Option<&mut Vec<LayerOutput<B>>>,
    name: &str,
    flow: &GroupedFlow<B>,
) {
    if let Some(trace) = trace.as_deref_mut() {
        trace.push(LayerOutput {
            name: name.to_owned(),
            flow: flow.clone(),
        });
    }
}

fn into_streams<B: Backend>(flow: GroupedFlow<B>, layer: &str) -> ModelResult<[Tensor<B, 5>; 3]> {
    match flow {
        GroupedFlow::Streams(streams) => Ok(streams),
        GroupedFlow::Single(_) => Err(ModelError::InvalidFlow {
            layer: layer.to_owned(),
            expected: "three output streams".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use burn::tensor::{Distribution, ElementConversion, Tolerance};
    use highres_mt_loss::LossType;

    use super::*;
    use crate::{
        config::{ConvSpec, ResidualSpec},
        tests::{TestAutodiffBackend, TestBackend},
    };

    fn tiny_config() -> ModelConfig {
        let layers = LayerSpecs::new()
            .with_conv_0(ConvSpec::new("conv_0".to_string(), 4, 3))
            .with_residual(vec![
                ResidualSpec::new("res_1".to_string(), 4).with_repeat(1),
                ResidualSpec::new("res_2".to_string(), 6)
                    .with_repeat(1)
                    .with_dilation(2),
                ResidualSpec::new("res_3".to_string(), 8)
                    .with_repeat(1)
                    .with_dilation(4),
            ])
            .with_conv_1(ConvSpec::new("conv_1".to_string(), 10, 1));

        ModelConfig::new(2).with_layers(layers)
    }

    fn images<B: Backend>(dims: [usize; 5]) -> Tensor<B, 5> {
        Tensor::random(dims, Distribution::Normal(0.0, 1.0), &Default::default())
    }

    fn labels<B: Backend>() -> Tensor<B, 5> {
        Tensor::<B, 5>::random([1, 1, 8, 8, 8], Distribution::Uniform(0.0, 1.99), &Default::default())
            .int()
            .float()
    }

    #[test]
    fn init_rejects_invalid_configuration() {
        let device = Default::default();
        let result = HighResMtNetConfig::new(ModelConfig::new(0)).init::<TestBackend>(&device);

        assert!(matches!(result, Err(ModelError::InvalidConfiguration { .. })));
    }

    #[test]
    fn forward_produces_logits_and_masks() {
        let device = Default::default();
        let model = HighResMtNetConfig::new(tiny_config())
            .init::<TestBackend>(&device)
            .unwrap();

        let output = model
            .forward(
                images([1, 1, 8, 8, 8]),
                CategoricalSampling::Gumbel { temperature: 0.5 },
            )
            .unwrap();

        assert_eq!(output.task_1.dims(), [1, 2, 8, 8, 8]);
        assert_eq!(output.task_2.dims(), [1, 2, 8, 8, 8]);
        let mask_dims: Vec<_> = output.masks.iter().map(Tensor::dims).collect();
        assert_eq!(mask_dims, vec![[4, 3], [10, 3]]);
        assert_eq!(output.probabilities.len(), 2);
    }

    #[test]
    fn forward_rejects_indivisible_spatial_dims() {
        let device = Default::default();
        let model = HighResMtNetConfig::new(tiny_config())
            .init::<TestBackend>(&device)
            .unwrap();

        let result = model.forward(images([1, 1, 8, 8, 6]), CategoricalSampling::Deterministic);

        match result {
            Err(ModelError::InvalidTensorShape { expected, .. }) => {
                assert!(expected.contains("divisible by 8"));
            }
            other => panic!("Expected InvalidTensorShape, got {other:?}"),
        }
    }

    #[test]
    fn forward_rejects_wrong_channel_count() {
        let device = Default::default();
        let model = HighResMtNetConfig::new(tiny_config())
            .init::<TestBackend>(&device)
            .unwrap();

        let result = model.forward(images([1, 3, 8, 8, 8]), CategoricalSampling::Deterministic);

        assert!(matches!(result, Err(ModelError::InvalidTensorShape { .. })));
    }

    #[test]
    fn layer_outputs_are_in_creation_order() {
        let device = Default::default();
        let model = HighResMtNetConfig::new(tiny_config())
            .init::<TestBackend>(&device)
            .unwrap();

        let outputs = model
            .layer_outputs(images([1, 1, 8, 8, 8]), CategoricalSampling::Deterministic)
            .unwrap();
        let names: Vec<_> = outputs.iter().map(|output| output.name.as_str()).collect();

        // conv_0, 3 stages x 3 streams x 1 block, conv_1, two heads
        assert_eq!(names.len(), 13);
        assert_eq!(names[0], "conv_0");
        assert_eq!(names[1], "res_1_0/task_1");
        assert_eq!(names[2], "res_1_0/shared");
        assert_eq!(names[9], "res_3_0/task_2");
        assert_eq!(names[10], "conv_1");
        assert_eq!(&names[11..], ["conv_2/task_1", "conv_2/task_2"]);
        assert_eq!(outputs[0].flow.num_streams(), 3);
        assert_eq!(outputs[4].flow.dims(), [1, 6, 8, 8, 8]);
    }

    #[test]
    fn forward_layer_counts_from_the_end() {
        let device = Default::default();
        let model = HighResMtNetConfig::new(tiny_config())
            .init::<TestBackend>(&device)
            .unwrap();
        let x = images([1, 1, 8, 8, 8]);

        let last = model.forward_layer(x.clone(), -1).unwrap();
        let expected = model
            .forward(x.clone(), CategoricalSampling::Deterministic)
            .unwrap()
            .task_2;
        last.stream(Stream::Task2)
            .into_data()
            .assert_approx_eq::<f32>(&expected.into_data(), Tolerance::default());

        let first = model.forward_layer(x.clone(), -13).unwrap();
        assert_eq!(first.num_streams(), 3);

        assert!(matches!(
            model.forward_layer(x.clone(), 13),
            Err(ModelError::LayerOutOfRange { num_layers: 13, .. })
        ));
        assert!(matches!(
            model.forward_layer(x, -14),
            Err(ModelError::LayerOutOfRange { .. })
        ));
    }

    #[test]
    fn forward_loss_weights_tasks() {
        let device = Default::default();
        let config = tiny_config()
            .with_loss_type(LossType::CrossEntropy)
            .with_task_weights([1.0, 0.0]);
        let model = HighResMtNetConfig::new(config)
            .init::<TestBackend>(&device)
            .unwrap();
        let batch = MultiTaskBatch::new(images([1, 1, 8, 8, 8]), labels(), labels());

        let output = model
            .forward_loss(batch, CategoricalSampling::Deterministic)
            .unwrap();

        let loss = output.loss.into_scalar().elem::<f32>();
        let task_1 = output.task_1_loss.into_scalar().elem::<f32>();
        assert!(loss.is_finite());
        assert!((loss - task_1).abs() < 1e-6);
    }

    #[test]
    fn forward_loss_applies_batch_weight_map() {
        let device = Default::default();
        let config = tiny_config().with_loss_type(LossType::CrossEntropy);
        let model = HighResMtNetConfig::new(config)
            .init::<TestBackend>(&device)
            .unwrap();
        let x = images([1, 1, 8, 8, 8]);
        let y = labels::<TestBackend>();
        let loss_with = |weight_map: Option<Tensor<TestBackend, 5>>| {
            let mut batch = MultiTaskBatch::new(x.clone(), y.clone(), y.clone());
            if let Some(weight_map) = weight_map {
                batch = batch.with_weight_map(weight_map);
            }
            model
                .forward_loss(batch, CategoricalSampling::Deterministic)
                .unwrap()
                .loss
                .into_scalar()
                .elem::<f32>()
        };

        let plain = loss_with(None);
        let uniform = loss_with(Some(Tensor::ones([1, 1, 8, 8, 8], &device)));
        let half = Tensor::cat(
            vec![
                Tensor::ones([1, 1, 4, 8, 8], &device),
                Tensor::zeros([1, 1, 4, 8, 8], &device),
            ],
            2,
        );
        let weighted = loss_with(Some(half));

        assert!((plain - uniform).abs() < 1e-5, "plain {plain}, uniform {uniform}");
        assert!((plain - weighted).abs() > 1e-6, "weight map ignored");
    }

    #[test]
    fn forward_loss_backpropagates() {
        let device = Default::default();
        let model = HighResMtNetConfig::new(tiny_config())
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        let sampling = model.training_sampling(0);
        let batch = MultiTaskBatch::new(images([1, 1, 8, 8, 8]), labels(), labels());

        let output = model.forward_loss(batch, sampling).unwrap();
        let grads = output.loss.backward();

        let params = burn::optim::GradientsParams::from_grads(grads, &model);
        assert!(!params.is_empty());
    }

    #[test]
    fn summary_lists_every_stage() {
        let device = Default::default();
        let model = HighResMtNetConfig::new(tiny_config())
            .init::<TestBackend>(&device)
            .unwrap();

        let summary = model.summary();

        for name in ["conv_0", "res_1", "res_2", "res_3", "conv_1", "conv_2", "scaled_approx_softmax"] {
            assert!(summary.contains(name), "missing {name} in\n{summary}");
        }
    }
}
