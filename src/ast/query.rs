use crate::ast::statements::{
    ConnectStatement, CreateStatement, GlobalOperator, SelectStatement,
};
use crate::ast::tokens::Pos;

/// One top-level TSL instruction together with its ambient connect binding.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub connect: ConnectStatement,
    pub kind: InstructionKind,
    pub pos: Pos,
}

/// Discriminated instruction body.
///
/// Every variant carries a [`SelectStatement`]: for operators it holds only
/// the frameworks chained after the operator, for creates it holds the
/// synthetic time bounds and the post-create chain.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    /// Plain data selection with its framework chain.
    Select(SelectStatement),
    /// Catalogue query terminated by `names()`, `selectors()`, `labels()`
    /// or `attributes()`.
    Meta(SelectStatement),
    /// Synthetic series construction followed by a framework chain.
    Create {
        create: CreateStatement,
        select: SelectStatement,
    },
    /// Recursive multi-series operator with post-operator frameworks.
    Operator {
        operator: GlobalOperator,
        select: SelectStatement,
    },
}

impl Instruction {
    pub fn new(connect: ConnectStatement, kind: InstructionKind, pos: Pos) -> Self {
        Instruction { connect, kind, pos }
    }

    /// The select statement every variant carries.
    pub fn select(&self) -> &SelectStatement {
        match &self.kind {
            InstructionKind::Select(s) | InstructionKind::Meta(s) => s,
            InstructionKind::Create { select, .. } => select,
            InstructionKind::Operator { select, .. } => select,
        }
    }

    pub fn select_mut(&mut self) -> &mut SelectStatement {
        match &mut self.kind {
            InstructionKind::Select(s) | InstructionKind::Meta(s) => s,
            InstructionKind::Create { select, .. } => select,
            InstructionKind::Operator { select, .. } => select,
        }
    }

    /// Marks a select as a meta (catalogue) query. No-op for other kinds.
    pub fn set_meta(&mut self) {
        if let InstructionKind::Select(s) = &mut self.kind {
            let select = std::mem::take(s);
            self.kind = InstructionKind::Meta(select);
        }
    }

    pub fn is_meta(&self) -> bool {
        matches!(self.kind, InstructionKind::Meta(_))
    }

    pub fn operator(&self) -> Option<&GlobalOperator> {
        match &self.kind {
            InstructionKind::Operator { operator, .. } => Some(operator),
            _ => None,
        }
    }

    pub fn operator_mut(&mut self) -> Option<&mut GlobalOperator> {
        match &mut self.kind {
            InstructionKind::Operator { operator, .. } => Some(operator),
            _ => None,
        }
    }

    /// Rebinds this instruction and every nested operator child to the given
    /// connect statement. Used when a variable reference is spliced in and
    /// must inherit the caller's ambient connect.
    pub fn set_connect(&mut self, connect: &ConnectStatement) {
        self.connect = connect.clone();
        if let InstructionKind::Operator { operator, .. } = &mut self.kind {
            for child in &mut operator.instructions {
                child.set_connect(connect);
            }
        }
    }
}

/// Ordered sequence of top-level instructions of one compilation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub instructions: Vec<Instruction>,
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            InstructionKind::Select(select) => {
                write!(f, "Select{{ metric: {}, frameworks: {} }}", select.metric, select.frameworks.len())
            }
            InstructionKind::Meta(select) => {
                write!(f, "Meta{{ metric: {} }}", select.metric)
            }
            InstructionKind::Create { create, .. } => {
                write!(f, "Create{{ series: {} }}", create.series.len())
            }
            InstructionKind::Operator { operator, select } => {
                write!(
                    f,
                    "Operator{{ op: {}, instructions: {}, frameworks: {} }}",
                    operator.operator.as_str(),
                    operator.instructions.len(),
                    select.frameworks.len()
                )
            }
        }
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self
            .instructions
            .iter()
            .map(|instruction| instruction.to_string())
            .collect();
        f.write_str(&rendered.join(";\n"))
    }
}
