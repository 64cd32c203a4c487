/* 📖 # What does the engine's request string look like?

The engine tokenizes its input strictly on `|`, so the request is a flat list of
fields, each one followed by a `|`, including the last:

    board|[secondBoard|]level|lines|currentPiece|nextPiece|inputFrameTimeline|playoutCount|playoutLength|pruningBreadth|

The second board only appears for move ratings. Integers are plain decimal, the piece
sentinel included (`-1`). There is no quoting or escaping; validated fields never
contain a `|`.
*/

use std::fmt::{Display, Write};

use crate::params::ParameterRecord;

pub const FIELD_SEPARATOR: char = '|';

/// Render a validated record in the engine's canonical request format.
pub fn serialize(record: &ParameterRecord) -> String {
    let mut request = String::with_capacity(2 * record.board.len() + 64);
    push_field(&mut request, &record.board);
    if !record.second_board.is_empty() {
        push_field(&mut request, &record.second_board);
    }
    push_field(&mut request, record.level);
    push_field(&mut request, record.lines);
    push_field(&mut request, record.current_piece);
    push_field(&mut request, record.next_piece);
    push_field(&mut request, &record.input_frame_timeline);
    push_field(&mut request, record.playout_count);
    push_field(&mut request, record.playout_length);
    push_field(&mut request, record.pruning_breadth);
    request
}

fn push_field(request: &mut String, value: impl Display) {
    // Writing into a String cannot fail.
    let _ = write!(request, "{}{}", value, FIELD_SEPARATOR);
}
