mod cleaner;
mod delta;
mod line_reader;
mod think;

pub use cleaner::{clean_answer, EMPTY_ANSWER_PLACEHOLDER};
pub use delta::extract_delta;
pub use line_reader::{StreamLine, StreamLineReader};
pub use think::{
    SplitFragment, ThinkPiece, ThinkSplitter, ThinkState, THINK_CLOSE, THINK_LEAD_IN, THINK_OPEN,
};
