use ndarray::{s, Array1, Array4, Axis};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

/// One mini-batch of samples. Images, labels and filenames (when requested)
/// are gathered under the same index permutation, so row `i` of each field
/// refers to the same source sample.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    pub images: Array4<T>,
    pub labels: Array1<i64>,
    pub filenames: Option<Vec<String>>,
}

/// Single-pass mini-batch iterator over an in-memory dataset.
///
/// A full random permutation of the sample indices is drawn once at
/// construction and sliced into contiguous `batch_size` chunks; the last
/// chunk may be short. With [`distort`](Batches::distort) enabled, each
/// yielded batch is reversed along the width axis with probability 0.5.
///
/// The iterator is not restartable; build a new one to reshuffle.
pub struct Batches<'a, T> {
    images: &'a Array4<T>,
    labels: &'a Array1<i64>,
    filenames: Option<&'a [String]>,
    order: Vec<usize>,
    batch_size: usize,
    cursor: usize,
    distort: bool,
    rng: StdRng,
}

impl<'a, T: Clone> Batches<'a, T> {
    pub fn new(images: &'a Array4<T>, labels: &'a Array1<i64>, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        assert_eq!(
            images.len_of(Axis(0)),
            labels.len(),
            "images and labels must have the same number of samples"
        );
        let mut rng = StdRng::from_entropy();
        let mut order: Vec<usize> = (0..labels.len()).collect();
        order.shuffle(&mut rng);
        Self {
            images,
            labels,
            filenames: None,
            order,
            batch_size,
            cursor: 0,
            distort: false,
            rng,
        }
    }

    /// Also yield the source filename of every sample, for tracing
    /// predictions back to the image they came from.
    pub fn with_filenames(mut self, filenames: &'a [String]) -> Self {
        assert_eq!(
            filenames.len(),
            self.labels.len(),
            "filenames must have the same number of samples"
        );
        self.filenames = Some(filenames);
        self
    }

    pub fn distort(mut self, distort: bool) -> Self {
        self.distort = distort;
        self
    }

    /// Reshuffle under a seeded rng so runs are reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self.order = (0..self.labels.len()).collect();
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
        self
    }

    /// Number of batches this iterator will yield in total.
    pub fn num_batches(&self) -> usize {
        (self.order.len() + self.batch_size - 1) / self.batch_size
    }
}

impl<'a, T: Clone> Iterator for Batches<'a, T> {
    type Item = Batch<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let idx = &self.order[self.cursor..end];
        self.cursor = end;

        let mut images = self.images.select(Axis(0), idx);
        let labels = self.labels.select(Axis(0), idx);

        if self.distort && self.rng.gen_bool(0.5) {
            images = images.slice(s![.., .., ..;-1, ..]).to_owned();
        }

        let filenames = self
            .filenames
            .map(|names| idx.iter().map(|&i| names[i].clone()).collect());

        Some(Batch {
            images,
            labels,
            filenames,
        })
    }
}
