//! Event-script bytecode disassembler.
//!
//! Three passes over the buffer: infer the virtual base from `setvaddress`,
//! collect jump and call targets as labels, then decode and render. Missing
//! symbols fall back to numeric placeholders; nothing here fails.

use crate::rom::{RomAccessor, ROM_BASE, ROM_LAST};
use crate::symbols::{ArgKind, SymbolTable};
use crate::text::{gen3_char, EOS};
use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

const OP_END: u8 = 0x02;
const OP_CALL: u8 = 0x04;
const OP_GOTO: u8 = 0x05;
const OP_GOTO_IF: u8 = 0x06;
const OP_CALL_IF: u8 = 0x07;
const OP_GOTOSTD: u8 = 0x08;
const OP_CALLSTD_IF: u8 = 0x0B;
const OP_SPECIAL: u8 = 0x25;
const OP_SPECIALVAR: u8 = 0x26;
const OP_SETFLAG: u8 = 0x29;
const OP_CLEARFLAG: u8 = 0x2A;
const OP_CHECKFLAG: u8 = 0x2B;
const OP_ADDITEM: u8 = 0x44;
const OP_CHECKITEM: u8 = 0x47;
const OP_SETVADDRESS: u8 = 0xB8;
const OP_VGOTO: u8 = 0xB9;
const OP_VCALL: u8 = 0xBA;
const OP_VGOTO_IF: u8 = 0xBB;
const OP_VCALL_IF: u8 = 0xBC;
const OP_VMESSAGE: u8 = 0xBD;

const RAM_SCRIPT_MAGIC: u8 = 0x33;
const RAM_SCRIPT_HEADER_SIZE: usize = 4;
const MAX_RAW_BYTES_SHOWN: usize = 8;
const EMBEDDED_STRING_MAX: usize = 256;
const PREVIEW_CHARS: usize = 50;

const RULE: &str = "; =========================================";

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WordStyle {
    Decimal,
    /// Decimal below the bound, hex at or above it.
    DecimalBelow(u32),
}

// (opcode, argument index, style); every other word argument is hex.
#[rustfmt::skip]
const WORD_POLICY: &[(u8, usize, WordStyle)] = &[
    (0x1A, 1, WordStyle::DecimalBelow(0x4000)), // setorcopyvar
    (0x1C, 1, WordStyle::DecimalBelow(0x100)),
    (0x1F, 1, WordStyle::DecimalBelow(0x100)),
    (0x21, 1, WordStyle::DecimalBelow(0x100)),  // compare_var_to_value
    (0x28, 0, WordStyle::Decimal),              // delay
    (0x44, 1, WordStyle::Decimal),              // additem
    (0x45, 1, WordStyle::Decimal),
    (0x46, 1, WordStyle::Decimal),
    (0x47, 1, WordStyle::Decimal),
    (0x49, 1, WordStyle::Decimal),
    (0x4A, 1, WordStyle::Decimal),
    (0x8F, 0, WordStyle::Decimal),              // random
    (0xB4, 0, WordStyle::Decimal),              // addcoins
    (0xB5, 0, WordStyle::Decimal),
];

/// Formats a word argument for `opcode` at `index`.
pub fn format_word(opcode: u8, index: usize, value: u32) -> String {
    let style = WORD_POLICY
        .iter()
        .find(|&&(op, i, _)| op == opcode && i == index)
        .map(|&(_, _, s)| s);
    match style {
        Some(WordStyle::Decimal) => value.to_string(),
        Some(WordStyle::DecimalBelow(bound)) if value < bound => value.to_string(),
        _ => format!("0x{value:04x}"),
    }
}

fn condition_description(code: u32) -> &'static str {
    match code {
        0 => "less than",
        1 => "equal to",
        2 => "greater than",
        3 => "less than or equal to",
        4 => "greater than or equal to",
        5 => "not equal to",
        _ => "unknown",
    }
}

fn is_virtual_jump(opcode: u8) -> bool {
    matches!(opcode, OP_VGOTO | OP_VCALL | OP_VGOTO_IF | OP_VCALL_IF)
}

fn is_direct_jump(opcode: u8) -> bool {
    matches!(opcode, OP_CALL | OP_GOTO | OP_GOTO_IF | OP_CALL_IF)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ArgValue {
    pub kind: ArgKind,
    pub value: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptInstruction {
    pub offset: usize,
    pub opcode: u8,
    pub name: String,
    pub args: Vec<ArgValue>,
    pub raw: Vec<u8>,
    pub label: Option<String>,
    pub comment: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RamScriptHeader {
    pub magic: u8,
    pub map_group: u8,
    pub map_num: u8,
    pub object_id: u8,
}

impl RamScriptHeader {
    pub fn parse(data: &[u8]) -> Option<Self> {
        match data {
            [magic, map_group, map_num, object_id, ..] => Some(Self {
                magic: *magic,
                map_group: *map_group,
                map_num: *map_num,
                object_id: *object_id,
            }),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == RAM_SCRIPT_MAGIC
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbeddedString {
    pub vaddr: u32,
    pub offset: usize,
    pub text: String,
}

/// What the rendered listing includes.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub comments: bool,
    pub bytes: bool,
    pub offsets: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            comments: true,
            bytes: true,
            offsets: true,
        }
    }
}

/// Structured result of the three passes.
#[derive(Clone, Debug, Default)]
pub struct Disassembly {
    pub base: Option<u32>,
    pub labels: BTreeMap<usize, String>,
    pub instructions: Vec<ScriptInstruction>,
    pub strings: Vec<EmbeddedString>,
    pub flags_resolved: usize,
    pub flags_unknown: usize,
}

pub struct ScriptDisassembler<'a> {
    symbols: &'a SymbolTable,
    rom: Option<&'a RomAccessor>,
    options: RenderOptions,
}

// Per-buffer state shared by the formatting helpers.
struct Pass<'d> {
    data: &'d [u8],
    base: Option<u32>,
    labels: BTreeMap<usize, String>,
}

impl Pass<'_> {
    fn virtual_to_offset(&self, vaddr: u32) -> Option<usize> {
        let base = self.base?;
        let off = vaddr.checked_sub(base)? as usize;
        (off < self.data.len()).then_some(off)
    }

    fn label_at(&self, offset: usize) -> Option<&str> {
        self.labels.get(&offset).map(String::as_str)
    }
}

impl<'a> ScriptDisassembler<'a> {
    pub fn new(symbols: &'a SymbolTable) -> Self {
        Self {
            symbols,
            rom: None,
            options: RenderOptions::default(),
        }
    }

    /// Resolves item, species and move names from the ROM's name tables.
    pub fn with_rom(mut self, rom: &'a RomAccessor) -> Self {
        self.rom = Some(rom);
        self
    }

    pub fn with_options(mut self, options: RenderOptions) -> Self {
        self.options = options;
        self
    }

    fn named_rom(&self) -> Option<&'a RomAccessor> {
        self.rom.filter(|r| r.has_name_tables())
    }

    /// Reads the arguments for `kinds` at `pos`, stopping at the first one
    /// that does not fit in the buffer.
    fn decode_args(data: &[u8], pos: usize, kinds: &[ArgKind]) -> (Vec<ArgValue>, usize) {
        let mut args = Vec::with_capacity(kinds.len());
        let mut p = pos;
        for &kind in kinds {
            let Some(bytes) = data.get(p..p + kind.size()) else {
                break;
            };
            let value = match kind.size() {
                1 => bytes[0] as u32,
                2 => LittleEndian::read_u16(bytes) as u32,
                _ => LittleEndian::read_u32(bytes),
            };
            args.push(ArgValue { kind, value });
            p += kind.size();
        }
        (args, p - pos)
    }

    /// Walks instructions up to `end`, yielding (offset, opcode, args).
    fn walk(&self, data: &[u8], mut visit: impl FnMut(usize, u8, &[ArgValue]) -> bool) {
        let mut offset = 0;
        while offset < data.len() {
            let opcode = data[offset];
            if opcode == OP_END {
                break;
            }
            match self.symbols.command(opcode) {
                Some(cmd) => {
                    let (args, len) = Self::decode_args(data, offset + 1, &cmd.arg_kinds());
                    if !visit(offset, opcode, &args) {
                        return;
                    }
                    offset += 1 + len;
                }
                None => offset += 1,
            }
        }
    }

    fn infer_base(&self, data: &[u8]) -> Option<u32> {
        let mut base = None;
        self.walk(data, |offset, opcode, args| {
            if opcode != OP_SETVADDRESS {
                return true;
            }
            match args.first() {
                Some(a) if (ROM_BASE..=ROM_LAST).contains(&a.value) => {
                    base = a.value.checked_sub(offset as u32);
                    false
                }
                _ => true,
            }
        });
        base
    }

    fn find_labels(&self, pass: &mut Pass<'_>) {
        let mut targets = Vec::new();
        self.walk(pass.data, |_, opcode, args| {
            let Some(last) = args.last() else {
                return true;
            };
            let needs_condition = matches!(opcode, OP_GOTO_IF | OP_CALL_IF | OP_VGOTO_IF | OP_VCALL_IF);
            if needs_condition && args.len() < 2 {
                return true;
            }
            if is_direct_jump(opcode) {
                if (last.value as usize) < pass.data.len() {
                    targets.push(last.value as usize);
                }
            } else if is_virtual_jump(opcode) {
                if let Some(off) = pass.virtual_to_offset(last.value) {
                    targets.push(off);
                }
            }
            true
        });
        for target in targets {
            let next = pass.labels.len();
            pass.labels
                .entry(target)
                .or_insert_with(|| format!("label_{next}"));
        }
    }

    /// Decodes Gen3 text inside the script buffer, expanding placeholders.
    fn decode_script_string(&self, data: &[u8], offset: usize) -> String {
        let end = data.len().min(offset.saturating_add(EMBEDDED_STRING_MAX));
        let mut out = String::new();
        let mut i = offset;
        while i < end {
            let b = data[i];
            match b {
                EOS => break,
                0xFD if i + 1 < end => {
                    let id = data[i + 1];
                    match self.symbols.placeholders.get(&id) {
                        Some(p) => out.push_str(p),
                        None => out.push_str(&format!("{{VAR_{id:02x}}}")),
                    }
                    i += 2;
                    continue;
                }
                0xFC if i + 1 < end => {
                    i += 2;
                    continue;
                }
                0xFA | 0xFE => out.push('\n'),
                0xFB => out.push_str("\n\n"),
                _ => {
                    if let Some(ch) = gen3_char(b) {
                        out.push(ch);
                    }
                }
            }
            i += 1;
        }
        out
    }

    fn embedded_string(&self, pass: &Pass<'_>, vaddr: u32) -> Option<(usize, String)> {
        let off = pass.virtual_to_offset(vaddr)?;
        let text = self.decode_script_string(pass.data, off);
        (!text.is_empty()).then_some((off, text))
    }

    fn format_arg(&self, pass: &Pass<'_>, opcode: u8, index: usize, arg: ArgValue) -> String {
        let v = arg.value;
        match arg.kind {
            ArgKind::Byte => {
                if index == 0 && matches!(opcode, OP_GOTO_IF | OP_CALL_IF | OP_VGOTO_IF | OP_VCALL_IF) {
                    return self
                        .symbols
                        .conditions
                        .get(&(v as u8))
                        .cloned()
                        .unwrap_or_else(|| format!("0x{v:02x}"));
                }
                if index == 0 && (OP_GOTOSTD..=OP_CALLSTD_IF).contains(&opcode) {
                    return self
                        .symbols
                        .std_scripts
                        .get(&(v as u8))
                        .cloned()
                        .unwrap_or_else(|| format!("STD_{v}"));
                }
                v.to_string()
            }
            ArgKind::Var => {
                if v < 0x4000 {
                    return v.to_string();
                }
                self.symbols
                    .variables
                    .get(&(v as u16))
                    .cloned()
                    .unwrap_or_else(|| format!("VAR_0x{v:04X}"))
            }
            ArgKind::Flag => self
                .symbols
                .flags
                .get(&(v as u16))
                .cloned()
                .unwrap_or_else(|| format!("FLAG_0x{v:04X}")),
            ArgKind::Item => match self.named_rom().map(|r| r.item_name(v as u16)) {
                Some(name) if !name.is_empty() => format!("ITEM_{name} (0x{v:04x})"),
                _ => format!("ITEM_0x{v:04X}"),
            },
            ArgKind::Species => match self.named_rom().map(|r| r.species_name(v as u16)) {
                Some(name) if !name.is_empty() => format!("SPECIES_{} ({v})", name.to_uppercase()),
                _ => format!("SPECIES_{v}"),
            },
            ArgKind::Move => match self.named_rom().map(|r| r.move_name(v as u16)) {
                Some(name) if !name.is_empty() => {
                    format!("MOVE_{} ({v})", name.to_uppercase().replace(' ', "_"))
                }
                _ => format!("MOVE_{v}"),
            },
            ArgKind::Word => format_word(opcode, index, v),
            ArgKind::Dword => {
                if is_virtual_jump(opcode) {
                    if let Some(label) = pass.virtual_to_offset(v).and_then(|o| pass.label_at(o)) {
                        return format!("@{label}");
                    }
                }
                format!("0x{v:08x}")
            }
            ArgKind::Pointer => {
                if is_direct_jump(opcode) {
                    if let Some(label) = pass.label_at(v as usize) {
                        return format!("@{label}");
                    }
                }
                format!("0x{v:08x}")
            }
        }
    }

    fn comment(
        &self,
        pass: &Pass<'_>,
        opcode: u8,
        args: &[ArgValue],
        flags_found: &mut HashSet<u16>,
        flags_unknown: &mut HashSet<u16>,
    ) -> String {
        let Some(cmd) = self.symbols.command(opcode) else {
            return format!("Unknown opcode 0x{opcode:02x}");
        };
        let mut extras: Vec<String> = Vec::new();
        let first = args.first().map(|a| a.value);

        match (opcode, first) {
            (OP_GOTO_IF | OP_CALL_IF | OP_VGOTO_IF | OP_VCALL_IF, Some(cond)) => {
                extras.push(format!("Condition: {}", condition_description(cond)));
            }
            (OP_GOTOSTD..=OP_CALLSTD_IF, Some(id)) => {
                if let Some(name) = self.symbols.std_scripts.get(&(id as u8)) {
                    extras.push(format!("-> {name}"));
                }
            }
            (OP_SPECIAL, Some(id)) => {
                if let Some(name) = self.symbols.specials.get(&(id as u16)) {
                    extras.push(format!("-> {name}"));
                }
            }
            (OP_SPECIALVAR, _) => {
                if let Some(name) = args.get(1).and_then(|a| self.symbols.specials.get(&(a.value as u16))) {
                    extras.push(format!("-> {name}"));
                }
            }
            (OP_SETFLAG | OP_CLEARFLAG | OP_CHECKFLAG, Some(id)) => {
                let id = id as u16;
                match self.symbols.flags.get(&id) {
                    Some(name) => {
                        flags_found.insert(id);
                        extras.push(match opcode {
                            OP_SETFLAG => format!("Sets {name} to TRUE"),
                            OP_CLEARFLAG => format!("Sets {name} to FALSE"),
                            _ => format!("Checks {name}"),
                        });
                    }
                    None => {
                        flags_unknown.insert(id);
                    }
                }
            }
            (OP_ADDITEM..=OP_CHECKITEM, Some(id)) => {
                if let Some(name) = self.named_rom().map(|r| r.item_name(id as u16)) {
                    if !name.is_empty() {
                        extras.push(format!("Item: {name}"));
                    }
                }
            }
            (OP_VMESSAGE, Some(vaddr)) => {
                if let Some((off, text)) = self.embedded_string(pass, vaddr) {
                    let flat = text.replace('\n', " ");
                    let mut preview: String = flat.chars().take(PREVIEW_CHARS).collect();
                    preview = preview.trim().to_string();
                    if text.chars().count() > PREVIEW_CHARS {
                        preview.push_str("...");
                    }
                    extras.push(format!("Text: \"{preview}\""));
                    extras.push(format!("(offset 0x{off:X} in data)"));
                }
            }
            (OP_SETVADDRESS, _) => {
                extras.push("Sets the base address for virtual commands".to_string());
            }
            _ => {}
        }

        if extras.is_empty() {
            cmd.desc.clone()
        } else {
            format!("{} | {}", cmd.desc, extras.join(" | "))
        }
    }

    /// Runs all three passes and returns the structured result.
    pub fn analyze(&self, data: &[u8]) -> Disassembly {
        let mut pass = Pass {
            data,
            base: self.infer_base(data),
            labels: BTreeMap::new(),
        };
        self.find_labels(&mut pass);

        let mut flags_found = HashSet::new();
        let mut flags_unknown = HashSet::new();
        let mut instructions = Vec::new();
        let mut offset = 0;

        while offset < data.len() {
            let opcode = data[offset];
            let label = pass.label_at(offset).map(str::to_string);

            if opcode == OP_END {
                instructions.push(ScriptInstruction {
                    offset,
                    opcode,
                    name: "end".to_string(),
                    args: Vec::new(),
                    raw: vec![opcode],
                    label,
                    comment: "Terminates script execution".to_string(),
                });
                break;
            }

            let (name, args, len) = match self.symbols.command(opcode) {
                Some(cmd) => {
                    let (args, len) = Self::decode_args(data, offset + 1, &cmd.arg_kinds());
                    (cmd.name.clone(), args, 1 + len)
                }
                None => (
                    "db".to_string(),
                    vec![ArgValue {
                        kind: ArgKind::Byte,
                        value: opcode as u32,
                    }],
                    1,
                ),
            };
            let comment = self.comment(&pass, opcode, &args, &mut flags_found, &mut flags_unknown);
            instructions.push(ScriptInstruction {
                offset,
                opcode,
                name,
                args,
                raw: data[offset..offset + len].to_vec(),
                label,
                comment,
            });
            offset += len;
        }

        let mut strings = Vec::new();
        let mut seen = BTreeSet::new();
        for ins in instructions.iter().filter(|i| i.opcode == OP_VMESSAGE) {
            let Some(arg) = ins.args.first() else { continue };
            if !seen.insert(arg.value) {
                continue;
            }
            if let Some((off, text)) = self.embedded_string(&pass, arg.value) {
                strings.push(EmbeddedString {
                    vaddr: arg.value,
                    offset: off,
                    text,
                });
            }
        }
        strings.sort_by_key(|s| s.offset);

        debug!(
            "disassembled {} bytes: {} instructions, {} labels, base {:?}",
            data.len(),
            instructions.len(),
            pass.labels.len(),
            pass.base
        );
        Disassembly {
            base: pass.base,
            labels: pass.labels,
            instructions,
            strings,
            flags_resolved: flags_found.len(),
            flags_unknown: flags_unknown.len(),
        }
    }

    fn render_instruction(&self, pass: &Pass<'_>, ins: &ScriptInstruction) -> String {
        let mut line = String::new();
        if self.options.offsets {
            line.push_str(&format!("  {:04x}:", ins.offset));
        }
        if self.options.bytes {
            let hex: String = ins
                .raw
                .iter()
                .take(MAX_RAW_BYTES_SHOWN)
                .map(|b| format!("{b:02X} "))
                .collect();
            line.push_str(&format!("  {hex:<24}"));
        }
        let args: Vec<String> = ins
            .args
            .iter()
            .enumerate()
            .map(|(i, &a)| {
                if ins.name == "db" {
                    format!("0x{:02x}", a.value)
                } else {
                    self.format_arg(pass, ins.opcode, i, a)
                }
            })
            .collect();
        let body = format!("{:<20} {}", ins.name, args.join(", "));
        line.push_str("  ");
        line.push_str(body.trim_end());
        if self.options.comments && !ins.comment.is_empty() {
            line.push_str(" # ");
            line.push_str(&ins.comment);
        }
        line
    }

    /// Disassembles a bare bytecode buffer into an annotated listing.
    pub fn disassemble(&self, data: &[u8]) -> String {
        let result = self.analyze(data);
        let pass = Pass {
            data,
            base: result.base,
            labels: result.labels.clone(),
        };

        let mut out: Vec<String> = vec!["; Pokemon Gen 3 Mystery Event Script Disassembly".to_string()];
        if let Some(rom) = self.rom {
            let v = rom.version();
            out.push(format!("; ROM: {} ({})", v.name, v.code));
        }
        if let Some(base) = result.base {
            out.push(format!("; Inferred virtual base address: 0x{base:08x}"));
        }
        out.push(format!("; Total instructions: {}", result.instructions.len()));
        out.push(format!("; Labels found: {}", result.labels.len()));
        out.push(format!("; Flags resolved: {}", result.flags_resolved));
        if result.flags_unknown > 0 {
            out.push(format!("; Unknown flags: {}", result.flags_unknown));
        }
        out.push(";".to_string());
        out.push("; Legend:".to_string());
        out.push(";   VAR_0x4xxx = Script variables (0x4000-0x40xx)".to_string());
        out.push(";   FLAG_0xxxxx = Game flags".to_string());
        out.push(";   @label_N   = Jump/call target".to_string());
        out.push(";   STD_xxx    = Standard script ID".to_string());
        if self.named_rom().is_some() {
            out.push(";   ITEM_xxx   = Item name from ROM".to_string());
            out.push(";   SPECIES_xxx = Pokemon species from ROM".to_string());
            out.push(";   MOVE_xxx   = Move name from ROM".to_string());
        }
        out.push(String::new());
        out.push(".script_start:".to_string());

        for ins in &result.instructions {
            if let Some(label) = &ins.label {
                out.push(String::new());
                out.push(format!("{label}:"));
            }
            out.push(self.render_instruction(&pass, ins));
        }

        out.push(String::new());
        out.push(".script_end".to_string());

        if !result.strings.is_empty() {
            out.push(String::new());
            out.push(RULE.to_string());
            out.push("; EMBEDDED STRINGS".to_string());
            out.push(RULE.to_string());
            for s in &result.strings {
                out.push(";".to_string());
                out.push(format!("; Address 0x{:08x} (offset 0x{:02x}):", s.vaddr, s.offset));
                for line in s.text.split('\n').filter(|l| !l.is_empty()) {
                    out.push(format!(";   \"{line}\""));
                }
            }
        }

        out.join("\n")
    }

    /// Disassembles a RAM script: a 4-byte header, then bytecode.
    pub fn disassemble_ram_script(&self, data: &[u8]) -> String {
        let Some(header) = RamScriptHeader::parse(data) else {
            return "; ERROR: Data too small for a RAM script\n".to_string();
        };
        let mut out = vec![
            RULE.to_string(),
            "; RAM Script Header".to_string(),
            RULE.to_string(),
            format!(
                ";   Magic: 0x{:02x} ({})",
                header.magic,
                if header.is_valid() { "valid" } else { "INVALID" }
            ),
            format!(";   Map Group: {} (0x{:02x})", header.map_group, header.map_group),
            format!(";   Map Num: {} (0x{:02x})", header.map_num, header.map_num),
            format!(";   Object ID: {} (0x{:02x})", header.object_id, header.object_id),
            ";".to_string(),
        ];
        out.push(self.disassemble(&data[RAM_SCRIPT_HEADER_SIZE..]));
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::tests::load_synthetic;
    use pretty_assertions::assert_eq;

    fn instruction_lines(listing: &str) -> Vec<&str> {
        listing.lines().filter(|l| l.starts_with("  ")).collect()
    }

    #[test]
    fn goto_to_terminator_yields_one_label_and_two_lines() {
        let symbols = SymbolTable::builtin();
        let dis = ScriptDisassembler::new(&symbols);
        let data = [0x05, 0x05, 0x00, 0x00, 0x00, 0x02];

        let result = dis.analyze(&data);
        assert_eq!(result.labels.len(), 1);
        assert_eq!(result.labels[&5], "label_0");
        assert_eq!(result.instructions.len(), 2);

        let listing = dis.disassemble(&data);
        let lines = instruction_lines(&listing);
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "  0000:  05 05 00 00 00            goto                 @label_0 # Jumps to a script"
        );
        assert!(listing.contains("\nlabel_0:\n  0005:"));
        assert!(listing.ends_with(".script_end"));
    }

    #[test]
    fn unknown_opcodes_decode_as_bytes() {
        let symbols = SymbolTable::empty();
        let dis = ScriptDisassembler::new(&symbols).with_options(RenderOptions {
            comments: true,
            bytes: false,
            offsets: false,
        });
        let listing = dis.disassemble(&[0xEE, 0x02]);
        let lines = instruction_lines(&listing);
        assert_eq!(
            lines,
            vec![
                "  db                   0xee # Unknown opcode 0xee",
                "  end # Terminates script execution",
            ]
        );
    }

    #[test]
    fn word_policy_is_per_opcode_and_index() {
        assert_eq!(format_word(0x44, 1, 5), "5");
        assert_eq!(format_word(0x44, 0, 5), "0x0005");
        assert_eq!(format_word(0x1A, 1, 0x10), "16");
        assert_eq!(format_word(0x1A, 1, 0x4001), "0x4001");
        assert_eq!(format_word(0x21, 1, 255), "255");
        assert_eq!(format_word(0x21, 1, 256), "0x0100");
        assert_eq!(format_word(0x25, 0, 10), "0x000a");
    }

    #[test]
    fn resolves_symbols_with_numeric_fallbacks() {
        let mut symbols = SymbolTable::builtin();
        symbols.flags.insert(0x820, "FLAG_BADGE01_GET".to_string());
        symbols.specials.insert(0x13B, "EnableNationalPokedex".to_string());
        let dis = ScriptDisassembler::new(&symbols);
        let data = [
            0x29, 0x20, 0x08, // setflag known
            0x2B, 0x21, 0x08, // checkflag unknown
            0x16, 0x00, 0x40, 0x03, 0x00, // setvar 0x4000, 3
            0x25, 0x3B, 0x01, // special
            0x44, 0x0D, 0x00, 0x02, 0x00, // additem
            0x06, 0x01, 0x00, 0x00, 0x00, 0x00, // goto_if = to offset 0
            0x02,
        ];
        let result = dis.analyze(&data);
        assert_eq!(result.flags_resolved, 1);
        assert_eq!(result.flags_unknown, 1);
        assert_eq!(result.labels[&0], "label_0");
        assert_eq!(
            result.instructions[0].comment,
            "Sets a flag | Sets FLAG_BADGE01_GET to TRUE"
        );
        assert_eq!(
            result.instructions[3].comment,
            "Calls a special function | -> EnableNationalPokedex"
        );

        let listing = dis.disassemble(&data);
        assert!(listing.contains("setflag              FLAG_BADGE01_GET #"));
        assert!(listing.contains("checkflag            FLAG_0x0821 #"));
        assert!(listing.contains("setvar               VAR_0x4000, 0x0003 #"));
        assert!(listing.contains("additem              ITEM_0x000D, 2 #"));
        assert!(listing.contains("goto_if              =, @label_0 # Jumps if the last comparison matches | Condition: equal to"));
        assert!(listing.contains("; Unknown flags: 1"));
    }

    #[test]
    fn virtual_addresses_resolve_labels_and_strings() {
        let symbols = SymbolTable::builtin();
        let dis = ScriptDisassembler::new(&symbols);
        let base: u32 = 0x0800_0000;
        let mut data = vec![0xB8];
        data.extend(base.to_le_bytes()); // setvaddress at 0
        data.push(0xBD);
        data.extend((base + 17).to_le_bytes()); // vmessage -> 17
        data.push(0xB9);
        data.extend((base + 16).to_le_bytes()); // vgoto -> 16
        data.push(0x00); // 15: nop
        data.push(0x02); // 16: end
        data.extend([0xC2, 0xDD, 0xFD, 0x01, 0xFE, 0xBB, 0xFF]); // "Hi{PLAYER}\nA"

        let result = dis.analyze(&data);
        assert_eq!(result.base, Some(base));
        assert_eq!(result.labels[&16], "label_0");
        assert_eq!(
            result.strings,
            vec![EmbeddedString {
                vaddr: base + 17,
                offset: 17,
                text: "Hi{PLAYER}\nA".to_string(),
            }]
        );
        assert_eq!(
            result.instructions[1].comment,
            "Shows a message at a virtual address | Text: \"Hi{PLAYER} A\" | (offset 0x11 in data)"
        );

        let listing = dis.disassemble(&data);
        assert!(listing.contains("vgoto                @label_0 #"));
        assert!(listing.contains("; Inferred virtual base address: 0x08000000"));
        assert!(listing.contains("; EMBEDDED STRINGS"));
        assert!(listing.contains(";   \"Hi{PLAYER}\""));
        assert!(listing.contains(";   \"A\""));
    }

    #[test]
    fn truncated_arguments_do_not_panic() {
        let symbols = SymbolTable::builtin();
        let dis = ScriptDisassembler::new(&symbols);
        let result = dis.analyze(&[0x06, 0x01, 0x00]);
        assert_eq!(result.instructions.len(), 1);
        assert_eq!(result.instructions[0].args.len(), 1);
        assert_eq!(result.instructions[0].raw, vec![0x06, 0x01]);
    }

    #[test]
    fn ram_script_header_is_reported() {
        let symbols = SymbolTable::builtin();
        let dis = ScriptDisassembler::new(&symbols);
        let listing = dis.disassemble_ram_script(&[0x33, 0x01, 0x02, 0x03, 0x02]);
        assert!(listing.contains(";   Magic: 0x33 (valid)"));
        assert!(listing.contains(";   Map Num: 2 (0x02)"));
        assert!(listing.contains("; Total instructions: 1"));
        assert!(dis.disassemble_ram_script(&[0x33]).starts_with("; ERROR"));
        assert!(!RamScriptHeader::parse(&[0, 0, 0, 0]).unwrap().is_valid());
    }

    #[test]
    fn rom_names_enrich_item_and_species_args() {
        let rom = load_synthetic();
        let symbols = SymbolTable::builtin();
        let dis = ScriptDisassembler::new(&symbols).with_rom(&rom);
        let listing = dis.disassemble(&[0x44, 0x01, 0x00, 0x01, 0x00, 0x7A, 0x01, 0x00, 0x7C, 0x01, 0x00, 0x02]);
        assert!(listing.contains("; ROM: Emerald (BPEE)"));
        assert!(listing.contains("additem              ITEM_POKEBALL (0x0001), 1 # Gives items to the player | Item: POKEBALL"));
        assert!(listing.contains("giveegg              SPECIES_BULBASAUR (1) #"));
        assert!(listing.contains("checkpartymove       MOVE_POUND (1) #"));
        assert!(listing.contains(";   ITEM_xxx   = Item name from ROM"));
    }
}
