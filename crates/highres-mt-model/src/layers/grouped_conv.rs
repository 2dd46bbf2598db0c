//! Convolution with learned categorical grouping of output kernels.
//!
//! Every output kernel owns three logits, one per group (task 1, shared,
//! task 2). A categorical sample of those logits forms a `[out_channels, 3]`
//! mask whose columns gate the convolution output into three streams. The
//! sample is a Gumbel-softmax relaxation during training and the arg-max group
//! at inference. Kernels whose logits tie take the group of a contiguous
//! `p_init`-proportioned split, so a freshly initialised layer feeds all three
//! streams.

use burn::{
    module::{Ignored, Param},
    prelude::*,
    tensor::{activation::softmax, TensorData},
};
use highres_mt_extra_ops::TensorExtraOps;

use super::conv::{ConvolutionalLayer, ConvolutionalLayerConfig};
use crate::{
    config::{Activation, CategoricalConfig, GroupConnection, Stream},
    error::{ModelError, ModelResult},
};

/// Number of groups: task 1, shared and task 2.
pub const NUM_GROUPS: usize = 3;

/// Floor applied to `p_init` before taking its logarithm.
const PROB_FLOOR: f64 = 1e-8;

/// Logits closer than this to a row's maximum count as tied.
const TIE_TOLERANCE: f64 = 1e-6;

/// How the categorical mask is drawn from the grouping logits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CategoricalSampling {
    /// Gumbel-softmax sample at the given temperature.
    Gumbel { temperature: f64 },
    /// Arg-max group of every kernel.
    Deterministic,
}

/// Activations flowing between grouped layers.
#[derive(Debug, Clone)]
pub enum GroupedFlow<B: Backend> {
    Single(Tensor<B, 5>),
    /// `[task_1, shared, task_2]`, all of identical shape.
    Streams([Tensor<B, 5>; 3]),
}

impl<B: Backend> GroupedFlow<B> {
    pub const fn num_streams(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Streams(_) => NUM_GROUPS,
        }
    }

    /// Shape of the first tensor in the flow.
    pub fn dims(&self) -> [usize; 5] {
        match self {
            Self::Single(x) => x.dims(),
            Self::Streams([first, ..]) => first.dims(),
        }
    }

    /// The tensor of `stream`, or the single tensor of a single flow.
    pub fn stream(&self, stream: Stream) -> Tensor<B, 5> {
        match self {
            Self::Single(x) => x.clone(),
            Self::Streams(streams) => streams[stream.index()].clone(),
        }
    }
}

/// Output of a grouped convolution.
#[derive(Debug, Clone)]
pub struct GroupedConvOutput<B: Backend> {
    /// Three-stream output flow.
    pub flow: GroupedFlow<B>,
    /// Sampled categorical mask, `[out_channels, 3]`.
    pub mask: Tensor<B, 2>,
    /// Group probabilities `softmax(logits)`, `[out_channels, 3]`.
    pub probabilities: Tensor<B, 2>,
}

#[derive(Config, Debug)]
pub struct LearnedCategoricalGroupConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 1)]
    pub dilation: usize,
    /// Expect a three-stream flow and build one branch per stream.
    #[config(default = false)]
    pub grouped_input: bool,
    #[config(default = "CategoricalConfig::new()")]
    pub categorical: CategoricalConfig,
    #[config(default = "Activation::PRelu")]
    pub acti_func: Activation,
    #[config(default = true)]
    pub with_bn: bool,
}

impl LearnedCategoricalGroupConvConfig {
    /// # Errors
    ///
    /// Returns `Err(ModelError::InvalidConfiguration)` when `p_init` is not a
    /// probability vector or `out_channels` is zero.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ModelResult<LearnedCategoricalGroupConv<B>> {
        self.categorical.validate()?;
        if self.out_channels == 0 {
            return Err(ModelError::InvalidConfiguration {
                reason: "grouped convolution needs at least one output channel".to_owned(),
            });
        }

        let num_branches = if self.grouped_input { NUM_GROUPS } else { 1 };
        let branches = (0..num_branches)
            .map(|_| {
                ConvolutionalLayerConfig::new(self.in_channels, self.out_channels)
                    .with_kernel_size(self.kernel_size)
                    .with_dilation(self.dilation)
                    .with_with_bn(self.with_bn)
                    .with_acti_func(self.acti_func.clone())
                    .init(device)
            })
            .collect();

        let row = if self.categorical.init_cat {
            self.categorical
                .p_init
                .map(|p| p.max(PROB_FLOOR).ln() as f32)
        } else {
            [0.0; NUM_GROUPS]
        };
        let logits = Tensor::<B, 1>::from_floats(row, device)
            .reshape([1, NUM_GROUPS])
            .repeat_dim(0, self.out_channels);

        let preferred = constant_assignment(self.out_channels, self.categorical.p_init);
        let constant_assignment = self.categorical.constant_grouping.then(|| preferred.clone());

        Ok(LearnedCategoricalGroupConv {
            branches,
            cat_logits: Param::from_tensor(logits),
            use_hardcat: self.categorical.use_hardcat,
            learn_cat: self.categorical.learn_cat,
            group_connection: Ignored(self.categorical.group_connection.clone()),
            constant_assignment: Ignored(constant_assignment),
            preferred_groups: Ignored(preferred),
        })
    }
}

/// Contiguous group ranges of `out_channels` in `p_init` proportions.
pub fn constant_assignment(out_channels: usize, p_init: [f64; 3]) -> Vec<usize> {
    let boundary = |share: f64| ((share * out_channels as f64).round() as usize).min(out_channels);
    let task_1_end = boundary(p_init[0]);
    let shared_end = boundary(p_init[0] + p_init[1]).max(task_1_end);

    (0..out_channels)
        .map(|channel| {
            if channel < task_1_end {
                Stream::Task1.index()
            } else if channel < shared_end {
                Stream::Shared.index()
            } else {
                Stream::Task2.index()
            }
        })
        .collect()
}

/// Convolutional layer whose output kernels are split into task-1, shared and
/// task-2 groups by a learned categorical mask.
#[derive(Module, Debug)]
pub struct LearnedCategoricalGroupConv<B: Backend> {
    /// One branch for a single input, one per stream for a grouped input.
    branches: Vec<ConvolutionalLayer<B>>,
    /// Grouping logits, `[out_channels, 3]`.
    cat_logits: Param<Tensor<B, 2>>,
    use_hardcat: bool,
    learn_cat: bool,
    group_connection: Ignored<GroupConnection>,
    constant_assignment: Ignored<Option<Vec<usize>>>,
    /// Group taken by a kernel whose deterministic choice is tied.
    preferred_groups: Ignored<Vec<usize>>,
}

impl<B: Backend> LearnedCategoricalGroupConv<B> {
    /// # Shapes
    ///
    /// - flow: `[batch_size, in_channels, depth, height, width]`, single or three streams
    /// - output flow: three streams of `[batch_size, out_channels, depth, height, width]`
    ///
    /// # Errors
    ///
    /// Returns `Err(ModelError::InvalidFlow)` when the flow does not match the
    /// layer's input arity and `Err(ModelError::InvalidConfiguration)` for a
    /// non-positive Gumbel temperature.
    pub fn forward(
        &self,
        flow: GroupedFlow<B>,
        sampling: CategoricalSampling,
    ) -> ModelResult<GroupedConvOutput<B>> {
        let probabilities = softmax(self.logits(), 1);
        let mask = self.mask(sampling)?;
        let [task_1, shared, task_2] = Stream::ALL.map(|stream| self.gate(&mask, stream));

        let flow = match (flow, self.branches.as_slice()) {
            (GroupedFlow::Single(x), [branch]) => {
                split_single(branch.forward(x), &task_1, &shared, &task_2)
            }
            (GroupedFlow::Streams(streams), [branch_1, branch_s, branch_2]) => {
                let [x_1, x_s, x_2] = streams;
                let y_1 = branch_1.forward(x_1);
                let y_s = branch_s.forward(x_s);
                let y_2 = branch_2.forward(x_2);

                match self.group_connection.0 {
                    GroupConnection::Mixed => {
                        let shared_part = y_s * shared;
                        [
                            y_1 * task_1 + shared_part.clone(),
                            shared_part.clone(),
                            y_2 * task_2 + shared_part,
                        ]
                    }
                    GroupConnection::Separate => [y_1 * task_1, y_s * shared, y_2 * task_2],
                    GroupConnection::Dense => {
                        split_single(y_1 + y_s + y_2, &task_1, &shared, &task_2)
                    }
                }
            }
            _ => {
                return Err(ModelError::InvalidFlow {
                    layer: "LearnedCategoricalGroupConv".to_owned(),
                    expected: format!("{} input stream(s)", self.branches.len()),
                })
            }
        };

        Ok(GroupedConvOutput {
            flow: GroupedFlow::Streams(flow),
            mask,
            probabilities,
        })
    }

    /// Grouping logits, cut from the graph when grouping is not learned.
    fn logits(&self) -> Tensor<B, 2> {
        let logits = self.cat_logits.val();
        if self.learn_cat {
            logits
        } else {
            logits.detach()
        }
    }

    fn mask(&self, sampling: CategoricalSampling) -> ModelResult<Tensor<B, 2>> {
        if let Some(assignment) = &self.constant_assignment.0 {
            return Ok(self.assignment_one_hot(assignment));
        }

        match sampling {
            CategoricalSampling::Gumbel { temperature } => {
                if !(temperature > 0.0) {
                    return Err(ModelError::InvalidConfiguration {
                        reason: format!("Gumbel temperature must be positive, got {temperature}"),
                    });
                }
                let soft = self.logits().gumbel_softmax(temperature, 1);
                if self.use_hardcat {
                    Ok(soft.straight_through(1))
                } else {
                    Ok(soft)
                }
            }
            CategoricalSampling::Deterministic => Ok(self.deterministic_mask()),
        }
    }

    /// Arg-max group per kernel, ties resolved towards the preferred group.
    fn deterministic_mask(&self) -> Tensor<B, 2> {
        let logits = self.logits().detach();
        let row_max = logits
            .clone()
            .max_dim(1)
            .sub_scalar(TIE_TOLERANCE)
            .repeat_dim(1, NUM_GROUPS);
        let tied = logits.greater_equal(row_max).float();
        let preferred = self.assignment_one_hot(&self.preferred_groups.0);

        // Tied and preferred scores 3, tied 2, anything else at most 1.
        (tied.mul_scalar(2.0) + preferred).hard_one_hot(1)
    }

    fn assignment_one_hot(&self, assignment: &[usize]) -> Tensor<B, 2> {
        let mut values = vec![0.0f32; assignment.len() * NUM_GROUPS];
        for (channel, &group) in assignment.iter().enumerate() {
            values[channel * NUM_GROUPS + group] = 1.0;
        }
        let data = TensorData::new(values, [assignment.len(), NUM_GROUPS]);
        Tensor::from_data(data, &self.cat_logits.val().device())
    }

    /// Mask column of `stream`, shaped to broadcast over `[batch, channels, d, h, w]`.
    fn gate(&self, mask: &Tensor<B, 2>, stream: Stream) -> Tensor<B, 5> {
        let [out_channels, _] = mask.dims();
        mask.clone()
            .narrow(1, stream.index(), 1)
            .reshape([1, out_channels, 1, 1, 1])
    }

    /// Number of kernels assigned to each group by the deterministic mask.
    pub fn group_counts(&self) -> [usize; 3] {
        let mut counts = [0usize; NUM_GROUPS];
        match &self.constant_assignment.0 {
            Some(assignment) => assignment.iter().for_each(|&group| counts[group] += 1),
            None => {
                let winners = self.deterministic_mask().argmax(1).into_data().convert::<i64>();
                if let Ok(winners) = winners.to_vec::<i64>() {
                    winners
                        .into_iter()
                        .filter_map(|group| usize::try_from(group).ok())
                        .for_each(|group| counts[group.min(NUM_GROUPS - 1)] += 1);
                }
            }
        }
        counts
    }

    pub fn out_channels(&self) -> usize {
        self.cat_logits.val().dims()[0]
    }

    /// Whether the layer expects a three-stream input.
    pub fn grouped_input(&self) -> bool {
        self.branches.len() == NUM_GROUPS
    }
}

fn split_single<B: Backend>(
    y: Tensor<B, 5>,
    task_1: &Tensor<B, 5>,
    shared: &Tensor<B, 5>,
    task_2: &Tensor<B, 5>,
) -> [Tensor<B, 5>; 3] {
    [
        y.clone() * (task_1.clone() + shared.clone()),
        y.clone() * shared.clone(),
        y * (task_2.clone() + shared.clone()),
    ]
}
