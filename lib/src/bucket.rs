pub(crate) type Slot = u32;
pub(crate) type Packed = u64;

/// Set of dense slots sharing one `(channel, position)` key.
///
/// Small sets are sorted vectors; once a bitmask over `0..=max` would be
/// smaller than the vector it replaces the bucket switches to a mask, and
/// switches back when removals thin it out again.
#[derive(Clone, Debug, Default)]
pub(crate) enum Bucket {
    #[default]
    Empty,
    Vec(Vec<Slot>),
    Mask(Vec<Packed>),
}

fn mask_words(max: Slot) -> usize {
    max as usize / Packed::BITS as usize + 1
}

fn mask_position(slot: Slot) -> (usize, u32) {
    (
        slot as usize / Packed::BITS as usize,
        slot % Packed::BITS,
    )
}

impl Bucket {
    /// Adds `slot`; returns false when it was already present.
    pub(crate) fn insert(&mut self, slot: Slot) -> bool {
        match self {
            Self::Empty => {
                *self = Self::Vec(vec![slot]);
                true
            }
            Self::Vec(vec) => {
                let Err(index) = vec.binary_search(&slot) else {
                    return false;
                };
                vec.insert(index, slot);
                let max = vec[vec.len() - 1];
                let vec_size = std::mem::size_of::<Slot>() * vec.len();
                let mask_size = std::mem::size_of::<Packed>() * mask_words(max);
                if vec_size > mask_size {
                    let mut mask = vec![0; mask_words(max)];
                    for &slot in vec.iter() {
                        let (index, offset) = mask_position(slot);
                        mask[index] |= 1 << offset;
                    }
                    *self = Self::Mask(mask);
                }
                true
            }
            Self::Mask(mask) => {
                let (index, offset) = mask_position(slot);
                if index >= mask.len() {
                    mask.resize(index + 1, 0);
                }
                let present = mask[index] & (1 << offset) != 0;
                mask[index] |= 1 << offset;
                !present
            }
        }
    }

    /// Drops `slot`; returns false when it was absent.
    pub(crate) fn remove(&mut self, slot: Slot) -> bool {
        match self {
            Self::Empty => false,
            Self::Vec(vec) => {
                let Ok(index) = vec.binary_search(&slot) else {
                    return false;
                };
                vec.remove(index);
                if vec.is_empty() {
                    *self = Self::Empty;
                }
                true
            }
            Self::Mask(mask) => {
                let (index, offset) = mask_position(slot);
                if index >= mask.len() || mask[index] & (1 << offset) == 0 {
                    return false;
                }
                mask[index] &= !(1 << offset);
                while mask.last() == Some(&0) {
                    mask.pop();
                }
                let len = self.len();
                if len == 0 {
                    *self = Self::Empty;
                } else if let Self::Mask(mask) = self {
                    // Half the break-even size, so a bucket hovering at the
                    // threshold does not flip on every call.
                    if 2 * std::mem::size_of::<Slot>() * len
                        < std::mem::size_of::<Packed>() * mask.len()
                    {
                        let mut vec = Vec::with_capacity(len);
                        for_each_bit(mask, |slot| vec.push(slot));
                        *self = Self::Vec(vec);
                    }
                }
                true
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Vec(vec) => vec.len(),
            Self::Mask(mask) => mask.iter().map(|m| m.count_ones() as usize).sum(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub(crate) fn for_each(&self, mut f: impl FnMut(Slot)) {
        match self {
            Self::Empty => {}
            Self::Vec(vec) => vec.iter().copied().for_each(f),
            Self::Mask(mask) => for_each_bit(mask, &mut f),
        }
    }
}

fn for_each_bit(mask: &[Packed], mut f: impl FnMut(Slot)) {
    for (index, &m) in mask.iter().enumerate() {
        let mut bits = m;
        while bits != 0 {
            let offset = bits.trailing_zeros();
            f(index as Slot * Packed::BITS + offset);
            bits &= bits - 1;
        }
    }
}
