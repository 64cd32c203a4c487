/* 📖 # How are request parameters validated?

Validation runs in two passes. The first pass looks up every field of the schema and
parses it: a missing field without a default fails with MissingParameter, an integer
that does not parse fails with MalformedInteger. Only once every field has a value
does the second pass check the semantic constraints (board shape, piece range, level
floor, ...). This keeps the order of checks deterministic: for any single field,
"missing" is reported before "malformed", which is reported before "out of range".

Parameters the schema does not name are ignored.
*/

use rabbit_base::http::QueryParams;
use rabbit_base::{ErrorKind, RabbitResult};

/// Number of cells on a board: 10 columns by 20 rows.
pub const BOARD_CELLS: usize = 200;

/// Piece value meaning "unknown".
pub const UNKNOWN_PIECE: i32 = -1;

pub const BOARD: &str = "board";
pub const SECOND_BOARD: &str = "secondBoard";
pub const INPUT_FRAME_TIMELINE: &str = "inputFrameTimeline";

/// Timeline used when none is given: one input every other frame (30 Hz).
pub const DEFAULT_INPUT_FRAME_TIMELINE: &str = "X.";

/// Schema entry for an integer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntField {
    pub name: &'static str,
    /// Human-readable name used in constraint messages.
    pub label: &'static str,
    pub default: i32,
    pub min: i32,
    /// Upper bound, if the field has one.
    pub max: Option<i32>,
}

impl IntField {
    fn check(&self, value: i32) -> RabbitResult<()> {
        let in_range = value >= self.min && self.max.is_none_or(|max| value <= max);
        if in_range {
            return Ok(());
        }
        let reason = match self.max {
            Some(max) => format!("{} must be between {} and {}", self.label, self.min, max),
            None => format!("{} must be {} or higher", self.label, self.min),
        };
        Err(ErrorKind::ConstraintViolation {
            field: self.name,
            reason,
        }
        .into())
    }
}

pub const LEVEL: IntField = IntField {
    name: "level",
    label: "Level",
    default: 18,
    min: 18,
    max: None,
};

pub const LINES: IntField = IntField {
    name: "lines",
    label: "Lines",
    default: 0,
    min: 0,
    max: None,
};

pub const CURRENT_PIECE: IntField = IntField {
    name: "currentPiece",
    label: "Current piece",
    default: UNKNOWN_PIECE,
    min: UNKNOWN_PIECE,
    max: Some(6),
};

pub const NEXT_PIECE: IntField = IntField {
    name: "nextPiece",
    label: "Next piece",
    default: UNKNOWN_PIECE,
    min: UNKNOWN_PIECE,
    max: Some(6),
};

/// 343 = 7^3, enough playouts to cover three pieces of lookahead.
pub const PLAYOUT_COUNT: IntField = IntField {
    name: "playoutCount",
    label: "Playout count",
    default: 343,
    min: 0,
    max: None,
};

pub const PLAYOUT_LENGTH: IntField = IntField {
    name: "playoutLength",
    label: "Playout length",
    default: 3,
    min: 0,
    max: None,
};

pub const PRUNING_BREADTH: IntField = IntField {
    name: "pruningBreadth",
    label: "Pruning breadth",
    default: 25,
    min: 0,
    max: None,
};

/// The validated parameters of one analysis request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterRecord {
    pub board: String,
    /// Empty unless the operation rates a move.
    pub second_board: String,
    pub level: i32,
    pub lines: i32,
    pub current_piece: i32,
    pub next_piece: i32,
    pub input_frame_timeline: String,
    pub playout_count: i32,
    pub playout_length: i32,
    pub pruning_breadth: i32,
}

impl ParameterRecord {
    /// A record for `board` with every other field at its default.
    pub fn with_board(board: impl Into<String>) -> Self {
        Self {
            board: board.into(),
            second_board: String::new(),
            level: LEVEL.default,
            lines: LINES.default,
            current_piece: CURRENT_PIECE.default,
            next_piece: NEXT_PIECE.default,
            input_frame_timeline: DEFAULT_INPUT_FRAME_TIMELINE.to_string(),
            playout_count: PLAYOUT_COUNT.default,
            playout_length: PLAYOUT_LENGTH.default,
            pruning_breadth: PRUNING_BREADTH.default,
        }
    }
}

/// Turn the query parameters of a request into a validated record.
///
/// `secondBoard` is only read when `require_second_board` is set; otherwise it is
/// left empty even if the client sent one.
pub fn validate(query: &QueryParams, require_second_board: bool) -> RabbitResult<ParameterRecord> {
    let record = ParameterRecord {
        board: required_string(query, BOARD)?,
        second_board: if require_second_board {
            required_string(query, SECOND_BOARD)?
        } else {
            String::new()
        },
        level: int_param(query, &LEVEL)?,
        lines: int_param(query, &LINES)?,
        current_piece: int_param(query, &CURRENT_PIECE)?,
        next_piece: int_param(query, &NEXT_PIECE)?,
        input_frame_timeline: query
            .get(INPUT_FRAME_TIMELINE)
            .unwrap_or(DEFAULT_INPUT_FRAME_TIMELINE)
            .to_string(),
        playout_count: int_param(query, &PLAYOUT_COUNT)?,
        playout_length: int_param(query, &PLAYOUT_LENGTH)?,
        pruning_breadth: int_param(query, &PRUNING_BREADTH)?,
    };

    check_board(BOARD, "Board string", &record.board)?;
    if require_second_board {
        check_board(SECOND_BOARD, "Second board string", &record.second_board)?;
    }
    CURRENT_PIECE.check(record.current_piece)?;
    NEXT_PIECE.check(record.next_piece)?;
    check_timeline(&record.input_frame_timeline)?;
    LEVEL.check(record.level)?;
    LINES.check(record.lines)?;
    PLAYOUT_COUNT.check(record.playout_count)?;
    PLAYOUT_LENGTH.check(record.playout_length)?;
    PRUNING_BREADTH.check(record.pruning_breadth)?;

    Ok(record)
}

fn required_string(query: &QueryParams, field: &'static str) -> RabbitResult<String> {
    query
        .get(field)
        .map(str::to_string)
        .ok_or_else(|| ErrorKind::MissingParameter { field }.into())
}

fn int_param(query: &QueryParams, field: &IntField) -> RabbitResult<i32> {
    match query.get(field.name) {
        None => Ok(field.default),
        Some(raw) => raw.parse::<i32>().map_err(|_| {
            ErrorKind::MalformedInteger {
                field: field.name,
                value: raw.to_string(),
            }
            .into()
        }),
    }
}

fn check_board(field: &'static str, label: &str, board: &str) -> RabbitResult<()> {
    if board.len() != BOARD_CELLS {
        return Err(ErrorKind::ConstraintViolation {
            field,
            reason: format!("{} must be {} characters long", label, BOARD_CELLS),
        }
        .into());
    }
    if !board.chars().all(|c| c == '0' || c == '1') {
        return Err(ErrorKind::ConstraintViolation {
            field,
            reason: format!("{} must only contain 0s and 1s", label),
        }
        .into());
    }
    Ok(())
}

fn check_timeline(timeline: &str) -> RabbitResult<()> {
    if timeline.chars().all(|c| c == 'X' || c == '.') {
        return Ok(());
    }
    Err(ErrorKind::ConstraintViolation {
        field: INPUT_FRAME_TIMELINE,
        reason: "inputFrameTimeline must only contain 'X' and '.'".to_string(),
    }
    .into())
}
