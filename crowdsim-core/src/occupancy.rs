use glam::IVec2;
use ndarray::Array2;
use thin_vec::ThinVec;

use super::util::Index;

/// Which agents stand on each world cell during the previous tick.
pub struct OccupancyGrid {
    pub data: Array2<ThinVec<u32>>,
    /// (rows, columns)
    pub shape: (usize, usize),
}

impl OccupancyGrid {
    pub fn new(shape: (usize, usize)) -> Self {
        let data = Array2::from_elem(shape, ThinVec::new());

        OccupancyGrid { data, shape }
    }

    pub fn update(&mut self, positions: impl IntoIterator<Item = IVec2>) {
        for cell in self.data.iter_mut() {
            cell.clear();
        }

        for (i, pos) in positions.into_iter().enumerate() {
            if let Some(agents) = self.data.get_mut(Index::from(pos)) {
                if !agents.has_capacity() {
                    agents.reserve(4);
                }
                agents.push(i as u32);
            }
        }
    }

    /// Agent indices on `cell`. Cells outside the grid are empty.
    pub fn agents_at(&self, cell: IVec2) -> &[u32] {
        self.data
            .get(Index::from(cell))
            .map(|agents| agents.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_occupied(&self, cell: IVec2) -> bool {
        !self.agents_at(cell).is_empty()
    }

    /// Compressed layout: `starts[c]..starts[c + 1]` indexes `agents` for row-major cell `c`.
    pub fn to_compressed(&self) -> (Vec<u32>, Vec<u32>) {
        let mut starts = Vec::with_capacity(self.data.len() + 1);
        let mut agents = Vec::new();
        starts.push(0);

        for cell in self.data.iter() {
            agents.extend_from_slice(cell);
            starts.push(agents.len() as u32);
        }

        (starts, agents)
    }
}
